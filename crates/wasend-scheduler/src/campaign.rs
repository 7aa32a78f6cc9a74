//! Campaign definitions — the JSON shape the campaign builder submits,
//! validation, and per-step content extraction.

use serde::{Deserialize, Serialize};
use wasend_core::{Attachment, ClientId, OutboundMessage, Poll, Result, WasendError};

use crate::window::SendWindow;

/// Maximum options WhatsApp accepts on one poll.
const MAX_POLL_OPTIONS: usize = 12;

/// A bulk-send job: content + recipients + timing window + optional
/// nurturing follow-ups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSpec {
    /// Caller-supplied id makes re-submission idempotent (crash/restart
    /// replay); generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub client_id: ClientId,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub shared_contact_cards: Vec<String>,
    #[serde(default)]
    pub polls: Vec<Poll>,
    pub recipients: Vec<String>,
    /// Daily window open, `"HH:mm"`.
    pub start_from: String,
    /// Daily window close, `"HH:mm"`.
    pub end_at: String,
    /// Optional extra random gap added to each computed send instant.
    #[serde(default)]
    pub delay_min_secs: u64,
    #[serde(default)]
    pub delay_max_secs: u64,
    /// Drip follow-ups, fired relative to the previous step's send time.
    #[serde(default)]
    pub nurturing: Vec<NurturingStep>,
}

/// A delayed follow-up message with its own window and content bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NurturingStep {
    #[serde(default)]
    pub message: Option<String>,
    /// Seconds after the previous step's send.
    pub after: u64,
    pub start_from: String,
    pub end_at: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub shared_contact_cards: Vec<String>,
    #[serde(default)]
    pub polls: Vec<Poll>,
}

impl CampaignSpec {
    /// Full validation. Nothing is persisted or enqueued before this
    /// passes.
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(WasendError::validation("campaign has no recipients"));
        }
        if self.recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(WasendError::validation("campaign has a blank recipient"));
        }
        self.window()?;
        if self.delay_min_secs > self.delay_max_secs {
            return Err(WasendError::validation("delay_min_secs exceeds delay_max_secs"));
        }

        for step_index in 0..self.step_count() {
            let content = self.content_template(step_index);
            if content.is_empty() {
                return Err(WasendError::validation(format!(
                    "step {step_index} has no message, attachment, contact card, or poll"
                )));
            }
            self.step_window(step_index)?;
            validate_polls(&content.polls, step_index)?;
        }
        Ok(())
    }

    /// Total steps: the initial send plus each nurturing follow-up.
    pub fn step_count(&self) -> u32 {
        1 + self.nurturing.len() as u32
    }

    /// The campaign's own window (step 0).
    pub fn window(&self) -> Result<SendWindow> {
        SendWindow::parse(&self.start_from, &self.end_at)
    }

    /// The window governing `step_index`.
    pub fn step_window(&self, step_index: u32) -> Result<SendWindow> {
        match self.nurturing_step(step_index) {
            None => self.window(),
            Some(step) => SendWindow::parse(&step.start_from, &step.end_at),
        }
    }

    /// Relative delay of `step_index` from the previous step, seconds.
    /// Step 0 has none.
    pub fn step_after(&self, step_index: u32) -> Option<u64> {
        self.nurturing_step(step_index).map(|s| s.after)
    }

    fn nurturing_step(&self, step_index: u32) -> Option<&NurturingStep> {
        if step_index == 0 {
            None
        } else {
            self.nurturing.get(step_index as usize - 1)
        }
    }

    /// Content bundle for `step_index` with the recipient left blank.
    fn content_template(&self, step_index: u32) -> OutboundMessage {
        match self.nurturing_step(step_index) {
            None => OutboundMessage {
                to: String::new(),
                message: self.message.clone(),
                attachments: self.attachments.clone(),
                shared_contact_cards: self.shared_contact_cards.clone(),
                polls: self.polls.clone(),
            },
            Some(step) => OutboundMessage {
                to: String::new(),
                message: step.message.clone(),
                attachments: step.attachments.clone(),
                shared_contact_cards: step.shared_contact_cards.clone(),
                polls: step.polls.clone(),
            },
        }
    }

    /// Content bundle for one recipient at one step.
    pub fn outbound_for(&self, recipient: &str, step_index: u32) -> OutboundMessage {
        let mut message = self.content_template(step_index);
        message.to = recipient.to_string();
        message
    }
}

fn validate_polls(polls: &[Poll], step_index: u32) -> Result<()> {
    for poll in polls {
        if poll.title.trim().is_empty() {
            return Err(WasendError::validation(format!(
                "step {step_index} has a poll without a title"
            )));
        }
        if poll.options.len() < 2 || poll.options.len() > MAX_POLL_OPTIONS {
            return Err(WasendError::validation(format!(
                "step {step_index} poll '{}' needs 2-{MAX_POLL_OPTIONS} options",
                poll.title
            )));
        }
        if poll.options.iter().any(|o| o.trim().is_empty()) {
            return Err(WasendError::validation(format!(
                "step {step_index} poll '{}' has a blank option",
                poll.title
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> CampaignSpec {
        CampaignSpec {
            campaign_id: None,
            client_id: ClientId::from("t1"),
            message: Some("Hello".into()),
            attachments: vec![],
            shared_contact_cards: vec![],
            polls: vec![],
            recipients: vec!["84900000001".into()],
            start_from: "10:00".into(),
            end_at: "18:00".into(),
            delay_min_secs: 0,
            delay_max_secs: 0,
            nurturing: vec![],
        }
    }

    #[test]
    fn minimal_campaign_is_valid() {
        minimal().validate().unwrap();
    }

    #[test]
    fn rejects_empty_recipients() {
        let mut spec = minimal();
        spec.recipients.clear();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_contentless_campaign() {
        let mut spec = minimal();
        spec.message = None;
        assert!(spec.validate().is_err());

        // Any single content kind is enough.
        spec.shared_contact_cards = vec!["card-1".into()];
        spec.validate().unwrap();
    }

    #[test]
    fn rejects_degenerate_window() {
        let mut spec = minimal();
        spec.end_at = "10:00".into();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn accepts_midnight_spanning_window() {
        let mut spec = minimal();
        spec.start_from = "22:00".into();
        spec.end_at = "02:00".into();
        spec.validate().unwrap();
    }

    #[test]
    fn rejects_contentless_nurturing_step() {
        let mut spec = minimal();
        spec.nurturing.push(NurturingStep {
            message: None,
            after: 3600,
            start_from: "09:00".into(),
            end_at: "23:00".into(),
            attachments: vec![],
            shared_contact_cards: vec![],
            polls: vec![],
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_bad_polls() {
        let mut spec = minimal();
        spec.polls.push(Poll {
            title: "Pick one".into(),
            options: vec!["only".into()],
            multiple_answers: false,
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn step_lookup() {
        let mut spec = minimal();
        spec.nurturing.push(NurturingStep {
            message: Some("Follow up".into()),
            after: 3600,
            start_from: "09:00".into(),
            end_at: "23:00".into(),
            attachments: vec![],
            shared_contact_cards: vec![],
            polls: vec![],
        });
        assert_eq!(spec.step_count(), 2);
        assert_eq!(spec.step_after(0), None);
        assert_eq!(spec.step_after(1), Some(3600));
        assert_eq!(spec.outbound_for("84900000001", 1).message.as_deref(), Some("Follow up"));
        assert_eq!(spec.step_window(1).unwrap().to_string(), "09:00-23:00");
    }

    #[test]
    fn ui_payload_shape_parses() {
        let spec: CampaignSpec = serde_json::from_str(
            r#"{
                "client_id": "t1",
                "message": "Launch day!",
                "attachments": [{"id": "att-1", "caption": "brochure"}],
                "shared_contact_cards": ["card-9"],
                "polls": [{"title": "Interested?", "options": ["Yes", "No"]}],
                "recipients": ["84900000001", "84900000002"],
                "start_from": "10:00",
                "end_at": "18:00",
                "nurturing": [
                    {"message": "Still thinking?", "after": 86400,
                     "start_from": "09:00", "end_at": "21:00"}
                ]
            }"#,
        )
        .unwrap();
        spec.validate().unwrap();
        assert_eq!(spec.recipients.len(), 2);
        assert_eq!(spec.nurturing[0].after, 86400);
    }
}
