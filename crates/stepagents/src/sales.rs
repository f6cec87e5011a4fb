use async_trait::async_trait;
use serde_json::{json, Map, Value};
use stepcore::{Agent, StepContext, StepError, StepOutput};

const SCAN_COST_PER_LEAD: f64 = 0.002;
const ENRICH_COST_PER_LEAD: f64 = 0.01;
const AI_COST_PER_MESSAGE: f64 = 0.01;

fn unsigned_param(ctx: &StepContext, name: &str, default: u64) -> Result<u64, StepError> {
    match ctx.params.get(name) {
        None => Ok(default),
        Some(v) => v.as_u64().ok_or_else(|| StepError::InvalidParameter {
            field: name.to_string(),
            expected: "non-negative integer".to_string(),
        }),
    }
}

/// Leads passed as a `leads` parameter, else the first array found under `context_keys`
fn leads_from<'a>(ctx: &'a StepContext, context_keys: &[&str]) -> &'a [Value] {
    ctx.params
        .get("leads")
        .or_else(|| context_keys.iter().find_map(|key| ctx.context.get(*key)))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Mock lead source producing a deterministic pool of scored leads
#[derive(Debug, Clone)]
pub struct LeadScannerAgent {
    pool_size: usize,
}

impl Default for LeadScannerAgent {
    fn default() -> Self {
        Self { pool_size: 25 }
    }
}

impl LeadScannerAgent {
    /// Cap on how many leads one scan can return
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self { pool_size }
    }

    fn scan_leads(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let limit = unsigned_param(ctx, "limit", 50)? as usize;
        let industry = ctx.param_str("industry").unwrap_or("saas");
        let count = limit.min(self.pool_size);

        let leads: Vec<Value> = (0..count)
            .map(|i| {
                json!({
                    "lead_id": format!("lead_{:03}", i + 1),
                    "company": format!("{} Prospect {}", industry.to_uppercase(), i + 1),
                    "industry": industry,
                    "score": 40 + (i * 37) % 61,
                })
            })
            .collect();

        ctx.events.progress(100.0, Some(format!("Found {} leads", count)));
        tracing::debug!(step_id = %ctx.step_id, count, industry, "Scanned leads");

        Ok(StepOutput::new()
            .with("lead_count", count)
            .with("leads", leads)
            .with_cost(count as f64 * SCAN_COST_PER_LEAD))
    }

    fn enrich_leads(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let min_score = unsigned_param(ctx, "min_score", 70)?;

        let enriched: Vec<Value> = leads_from(ctx, &["leads"])
            .iter()
            .filter_map(Value::as_object)
            .filter(|lead| lead.get("score").and_then(Value::as_u64).unwrap_or(0) >= min_score)
            .map(|lead| {
                let mut lead = lead.clone();
                let id = lead.get("lead_id").and_then(Value::as_str).unwrap_or("unknown").to_string();
                let score = lead.get("score").and_then(Value::as_u64).unwrap_or(0);
                lead.insert("email".into(), json!(format!("contact@{}.example.com", id)));
                lead.insert("company_size".into(), json!(score * 10));
                lead.insert("enriched".into(), json!(true));
                Value::Object(lead)
            })
            .collect();

        let count = enriched.len();
        ctx.events.info(format!("Enriched {} leads scoring at least {}", count, min_score));

        Ok(StepOutput::new()
            .with("enriched_count", count)
            .with("enriched_leads", enriched)
            .with_cost(count as f64 * ENRICH_COST_PER_LEAD))
    }
}

#[async_trait]
impl Agent for LeadScannerAgent {
    fn functions(&self) -> Vec<String> {
        vec!["enrich_leads".to_string(), "scan_leads".to_string()]
    }

    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError> {
        match function {
            "scan_leads" => self.scan_leads(&ctx),
            "enrich_leads" => self.enrich_leads(&ctx),
            other => Err(StepError::failed(format!("LeadScannerAgent has no function '{}'", other))),
        }
    }
}

/// Drafts one outreach message per lead
///
/// Leads come from a `leads` parameter, else the context's `enriched_leads`,
/// else its raw `leads`. `mode` is `template` (free) or `ai` (billed per message).
#[derive(Debug, Clone, Default)]
pub struct OutreachComposerAgent;

impl OutreachComposerAgent {
    fn compose(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let mode = ctx.param_str("mode").unwrap_or("template");
        let personalized = match mode {
            "ai" => true,
            "template" => false,
            _ => {
                return Err(StepError::InvalidParameter {
                    field: "mode".to_string(),
                    expected: "'ai' or 'template'".to_string(),
                })
            }
        };

        let messages: Vec<Value> = leads_from(ctx, &["enriched_leads", "leads"])
            .iter()
            .filter_map(Value::as_object)
            .map(|lead| message_for(lead, personalized))
            .collect();

        let count = messages.len();
        if count == 0 {
            ctx.events.warn("No leads to compose outreach for");
        }

        let cost = if personalized {
            count as f64 * AI_COST_PER_MESSAGE
        } else {
            0.0
        };

        Ok(StepOutput::new()
            .with("message_count", count)
            .with("messages", messages)
            .with_cost(cost))
    }
}

fn message_for(lead: &Map<String, Value>, personalized: bool) -> Value {
    let company = lead.get("company").and_then(Value::as_str).unwrap_or("your team");
    let (subject, body) = if personalized {
        (
            format!("Quick idea for {}", company),
            format!(
                "Hi {} team, we help {} companies like yours cut manual prospecting work.",
                company,
                lead.get("industry").and_then(Value::as_str).unwrap_or("growing")
            ),
        )
    } else {
        (
            "Introducing our platform".to_string(),
            format!("Hello {}, we would love to show you what we do.", company),
        )
    };

    json!({
        "lead_id": lead.get("lead_id").cloned().unwrap_or(Value::Null),
        "to": lead.get("email").cloned().unwrap_or(Value::Null),
        "subject": subject,
        "body": body,
        "personalized": personalized,
    })
}

#[async_trait]
impl Agent for OutreachComposerAgent {
    fn functions(&self) -> Vec<String> {
        vec!["compose_outreach".to_string()]
    }

    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError> {
        match function {
            "compose_outreach" => self.compose(&ctx),
            other => Err(StepError::failed(format!("OutreachComposerAgent has no function '{}'", other))),
        }
    }
}
