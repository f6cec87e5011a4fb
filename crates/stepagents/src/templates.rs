use stepcore::{Step, StepType, Template};

/// The sales workflows every fresh orchestrator is seeded with
pub fn default_templates() -> Vec<Template> {
    vec![lead_generation_basic(), outreach_campaign_ai(), meeting_pipeline()]
}

fn lead_generation_basic() -> Template {
    Template::new("lead_generation_basic", "Basic Lead Generation", "lead_generation")
        .with_description("Scan for leads, enrich data, and prepare for outreach")
        .with_step(
            Step::new("scan_leads", "Scan for Leads", StepType::ScanLeads)
                .with_agent("LeadScannerAgent", "scan_leads")
                .with_parameter("limit", 50)
                .with_estimate(120, 0.10),
        )
        .with_step(
            Step::new("enrich_high_value", "Enrich High-Value Leads", StepType::EnrichLeads)
                .with_agent("LeadScannerAgent", "enrich_leads")
                .depends_on("scan_leads")
                .with_condition("len(context.get('leads', [])) > 0")
                .with_estimate(180, 0.50),
        )
}

fn outreach_campaign_ai() -> Template {
    Template::new("outreach_campaign_ai", "AI-Powered Outreach Campaign", "outreach")
        .with_description("Generate personalized outreach messages and send emails")
        .with_step(
            Step::new("compose_messages", "Compose Personalized Messages", StepType::ComposeOutreach)
                .with_agent("OutreachComposerAgent", "compose_outreach")
                .with_parameter("mode", "ai")
                .with_parallel_group("compose")
                .with_estimate(60, 0.25),
        )
        .with_step(
            Step::new("send_emails", "Send Outreach Emails", StepType::SendEmail)
                .depends_on("compose_messages")
                .with_estimate(30, 0.05),
        )
        .with_step(
            Step::new("schedule_followup", "Schedule Follow-up", StepType::FollowUp)
                .depends_on("send_emails")
                .with_parameter("delay_days", 3)
                .with_estimate(15, 0.01),
        )
}

fn meeting_pipeline() -> Template {
    Template::new("meeting_pipeline", "Meeting Pipeline Management", "meeting")
        .with_description("Track responses and schedule meetings")
        .with_step(
            Step::new("track_responses", "Track Email Responses", StepType::TrackResponse).with_estimate(45, 0.02),
        )
        .with_step(
            Step::new("schedule_meetings", "Schedule Meetings", StepType::ScheduleMeeting)
                .depends_on("track_responses")
                .with_condition("context.get('responses', 0) > 0")
                .with_estimate(90, 0.10),
        )
        .with_step(
            Step::new("update_crm", "Update CRM Records", StepType::UpdateCrm)
                .depends_on("schedule_meetings")
                .with_parallel_group("update")
                .with_estimate(30, 0.03),
        )
}
