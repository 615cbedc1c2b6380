//! 内存邮件能力（email_sender）：只记录发件内容，不真正发送

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::CapabilityError;
use crate::tools::{decode_input, schema_of, Capability, FaultPlan};

fn default_template() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct EmailInput {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_template")]
    pub template: String,
}

pub struct EmailTool {
    outbox: Arc<Mutex<Vec<EmailInput>>>,
    next_id: AtomicU64,
    faults: Arc<FaultPlan>,
}

impl EmailTool {
    pub fn new() -> Self {
        Self {
            outbox: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            faults: Arc::new(FaultPlan::none()),
        }
    }

    pub fn with_faults(mut self, faults: Arc<FaultPlan>) -> Self {
        self.faults = faults;
        self
    }

    /// 已发送邮件的共享句柄
    pub fn outbox(&self) -> Arc<Mutex<Vec<EmailInput>>> {
        self.outbox.clone()
    }
}

impl Default for EmailTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for EmailTool {
    fn name(&self) -> &str {
        "email_sender"
    }

    fn description(&self) -> &str {
        "Send emails to customers for confirmations, notifications, and updates"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<EmailInput>()
    }

    async fn execute(&self, input: Value) -> Result<Value, CapabilityError> {
        let email: EmailInput = decode_input(input)?;
        let valid_address = email
            .to
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid_address {
            return Err(CapabilityError::Validation(format!(
                "invalid recipient address '{}'",
                email.to
            )));
        }
        if email.subject.trim().is_empty() {
            return Err(CapabilityError::Validation("subject must not be empty".into()));
        }
        self.faults.check("email service")?;

        let message_id = format!("MSG-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body_length = email.body.len(),
            message_id = %message_id,
            "Mock email sent"
        );
        let reply = serde_json::json!({
            "success": true,
            "message_id": message_id,
            "recipient": email.to,
            "subject": email.subject,
            "status": "sent",
        });
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(email);
        }
        Ok(reply)
    }
}
