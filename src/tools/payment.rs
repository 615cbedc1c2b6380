//! 内存支付网关能力：退款与付款查询（payment_gateway）

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::error::CapabilityError;
use crate::tools::database::{seed_payments, PaymentRecord};
use crate::tools::{decode_input, schema_of, Capability, FaultPlan};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PaymentRequest {
    Refund {
        payment_id: String,
        customer_id: String,
        amount: f64,
        reason: String,
    },
    Query {
        payment_id: String,
        customer_id: String,
    },
}

pub struct PaymentTool {
    ledger: HashMap<String, Vec<PaymentRecord>>,
    next_refund: AtomicU64,
    faults: Arc<FaultPlan>,
}

impl PaymentTool {
    pub fn new() -> Self {
        Self {
            ledger: seed_payments(),
            next_refund: AtomicU64::new(1),
            faults: Arc::new(FaultPlan::none()),
        }
    }

    pub fn with_faults(mut self, faults: Arc<FaultPlan>) -> Self {
        self.faults = faults;
        self
    }

    fn find(&self, customer_id: &str, payment_id: &str) -> Result<&PaymentRecord, CapabilityError> {
        self.ledger
            .get(customer_id)
            .and_then(|p| p.iter().find(|p| p.payment_id == payment_id))
            .ok_or_else(|| {
                CapabilityError::Validation(format!(
                    "payment {payment_id} not found for customer {customer_id}"
                ))
            })
    }
}

impl Default for PaymentTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for PaymentTool {
    fn name(&self) -> &str {
        "payment_gateway"
    }

    fn description(&self) -> &str {
        "Process refunds and query payment status"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PaymentRequest>()
    }

    async fn execute(&self, input: Value) -> Result<Value, CapabilityError> {
        let request: PaymentRequest = decode_input(input)?;
        self.faults.check("payment gateway")?;

        match request {
            PaymentRequest::Refund {
                payment_id,
                customer_id,
                amount,
                reason,
            } => {
                let payment = self.find(&customer_id, &payment_id)?;
                if !(amount > 0.0) || amount > payment.amount {
                    return Err(CapabilityError::Validation(format!(
                        "refund amount {amount:.2} outside (0, {:.2}]",
                        payment.amount
                    )));
                }
                let n = self.next_refund.fetch_add(1, Ordering::SeqCst);
                tracing::info!(payment_id = %payment_id, amount, reason = %reason, "Refund processed");
                Ok(serde_json::json!({
                    "success": true,
                    "refund_id": format!("REF-{n:04}"),
                    "payment_id": payment_id,
                    "amount": amount,
                    "status": "processed",
                    "estimated_arrival": "3-5 business days",
                    "message": format!("Refund of ${amount:.2} has been processed successfully"),
                }))
            }
            PaymentRequest::Query {
                payment_id,
                customer_id,
            } => {
                let payment = self.find(&customer_id, &payment_id)?;
                Ok(serde_json::json!({
                    "found": true,
                    "payment_id": payment.payment_id,
                    "status": payment.status,
                    "amount": payment.amount,
                    "date": payment.date,
                    "method": "credit_card",
                }))
            }
        }
    }
}
