//! 内存数据库能力：客户信息、工单历史、付款记录（database_query）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::CapabilityError;
use crate::tools::{decode_input, schema_of, Capability, FaultPlan};

fn default_limit() -> usize {
    10
}

/// 查询参数，按 query_type 区分
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "query_type", rename_all = "snake_case")]
pub enum DatabaseQuery {
    CustomerInfo {
        customer_id: String,
    },
    TicketHistory {
        customer_id: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    PaymentHistory {
        customer_id: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub tier: String,
    pub account_status: String,
    pub joined_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub date: String,
    pub subject: String,
    pub status: String,
    pub resolution_time_hours: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub date: String,
    pub amount: f64,
    pub status: String,
    pub description: String,
}

/// 演示用数据集
pub fn seed_customers() -> HashMap<String, CustomerRecord> {
    let customers = [
        ("C12345", "John Doe", "john.doe@example.com", "pro", "2023-01-15"),
        ("C67890", "Jane Smith", "jane.smith@example.com", "enterprise", "2022-06-10"),
    ];
    customers
        .into_iter()
        .map(|(id, name, email, tier, joined)| {
            (
                id.to_string(),
                CustomerRecord {
                    customer_id: id.to_string(),
                    name: name.to_string(),
                    email: email.to_string(),
                    tier: tier.to_string(),
                    account_status: "active".to_string(),
                    joined_date: joined.to_string(),
                },
            )
        })
        .collect()
}

fn seed_tickets() -> HashMap<String, Vec<TicketRecord>> {
    let ticket = |id: &str, date: &str, subject: &str, hours: u32| TicketRecord {
        ticket_id: id.to_string(),
        date: date.to_string(),
        subject: subject.to_string(),
        status: "resolved".to_string(),
        resolution_time_hours: hours,
    };
    HashMap::from([
        (
            "C12345".to_string(),
            vec![
                ticket("T-001", "2024-11-20", "Password reset", 2),
                ticket("T-002", "2024-12-01", "Billing question", 4),
            ],
        ),
        (
            "C67890".to_string(),
            vec![ticket("T-003", "2024-10-15", "Feature request", 48)],
        ),
    ])
}

/// 付款记录（按时间升序），支付网关共用同一份数据校验退款
pub fn seed_payments() -> HashMap<String, Vec<PaymentRecord>> {
    let payment = |id: &str, date: &str, amount: f64, description: &str| PaymentRecord {
        payment_id: id.to_string(),
        date: date.to_string(),
        amount,
        status: "completed".to_string(),
        description: description.to_string(),
    };
    HashMap::from([
        (
            "C12345".to_string(),
            vec![
                payment("PAY-001", "2024-11-01", 49.99, "Pro subscription - November"),
                payment("PAY-002", "2024-12-01", 49.99, "Pro subscription - December"),
            ],
        ),
        (
            "C67890".to_string(),
            vec![payment(
                "PAY-003",
                "2024-11-01",
                199.99,
                "Enterprise subscription - November",
            )],
        ),
    ])
}

pub struct DatabaseTool {
    customers: HashMap<String, CustomerRecord>,
    tickets: HashMap<String, Vec<TicketRecord>>,
    payments: HashMap<String, Vec<PaymentRecord>>,
    faults: Arc<FaultPlan>,
}

impl DatabaseTool {
    pub fn new() -> Self {
        Self {
            customers: seed_customers(),
            tickets: seed_tickets(),
            payments: seed_payments(),
            faults: Arc::new(FaultPlan::none()),
        }
    }

    pub fn with_faults(mut self, faults: Arc<FaultPlan>) -> Self {
        self.faults = faults;
        self
    }

    fn to_value<T: Serialize>(value: T) -> Result<Value, CapabilityError> {
        serde_json::to_value(value).map_err(|e| CapabilityError::Validation(e.to_string()))
    }
}

impl Default for DatabaseTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for DatabaseTool {
    fn name(&self) -> &str {
        "database_query"
    }

    fn description(&self) -> &str {
        "Query customer information, ticket history, or payment history from the database"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DatabaseQuery>()
    }

    async fn execute(&self, input: Value) -> Result<Value, CapabilityError> {
        let query: DatabaseQuery = decode_input(input)?;
        self.faults.check("database")?;

        match query {
            DatabaseQuery::CustomerInfo { customer_id } => match self.customers.get(&customer_id) {
                Some(customer) => Ok(serde_json::json!({
                    "found": true,
                    "customer": Self::to_value(customer)?,
                })),
                None => Ok(serde_json::json!({
                    "found": false,
                    "message": format!("Customer {customer_id} not found"),
                })),
            },
            DatabaseQuery::TicketHistory { customer_id, limit } => {
                let tickets = self.tickets.get(&customer_id).map(Vec::as_slice).unwrap_or(&[]);
                Ok(serde_json::json!({
                    "found": !tickets.is_empty(),
                    "tickets": Self::to_value(tickets.iter().take(limit).collect::<Vec<_>>())?,
                    "total_count": tickets.len(),
                }))
            }
            DatabaseQuery::PaymentHistory { customer_id, limit } => {
                let payments = self.payments.get(&customer_id).map(Vec::as_slice).unwrap_or(&[]);
                Ok(serde_json::json!({
                    "found": !payments.is_empty(),
                    "payments": Self::to_value(payments.iter().take(limit).collect::<Vec<_>>())?,
                    "total_count": payments.len(),
                }))
            }
        }
    }
}
