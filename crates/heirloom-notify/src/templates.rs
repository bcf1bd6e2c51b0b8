//! Notification message templates

/// A notification message ready to send
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    /// Message subject (for email)
    pub subject: String,
    /// Message body (plain text)
    pub body: String,
}

/// Claim-code delivery when a plan's claim window opens.
pub fn claim_code_message(plan_name: &str, code: &str) -> NotificationMessage {
    NotificationMessage {
        subject: format!("Heirloom: your share of \"{plan_name}\" can now be claimed"),
        body: format!(
            r#"Hello,

You have been named a beneficiary of the inheritance plan "{plan_name}",
and its claim window is now open.

Your claim code: {code}

To claim your share, open the claim page and enter this code together
with your name, email address, and relationship to the plan owner,
exactly as the owner recorded them. The code belongs to you alone;
do not share it with anyone.

Heirloom"#
        ),
    }
}

/// Owner check-in prompt with a single-use confirmation link.
pub fn check_in_prompt_message(
    plan_name: &str,
    check_in_url_base: &str,
    token: &str,
) -> NotificationMessage {
    NotificationMessage {
        subject: format!("Heirloom: please confirm activity on \"{plan_name}\""),
        body: format!(
            r#"Hello,

Your inheritance plan "{plan_name}" has proof-of-life protection
enabled, and a periodic check-in is due.

Confirm you are active by opening this link:

    {check_in_url_base}?token={token}

The link is valid once. If you miss several check-ins in a row, your
plan may become claimable by its beneficiaries ahead of schedule.

Heirloom"#
        ),
    }
}

/// Beneficiary notice for an upcoming or just-executed distribution.
pub fn distribution_notice_message(
    plan_name: &str,
    period_number: u32,
    units: u64,
) -> NotificationMessage {
    NotificationMessage {
        subject: format!("Heirloom: distribution {period_number} of \"{plan_name}\""),
        body: format!(
            r#"Hello,

Scheduled distribution {period_number} of the inheritance plan
"{plan_name}" ({units} base units) is being processed. You will see
the released amount reflected in your share.

Heirloom"#
        ),
    }
}

/// Operator alert for conditions that need a human.
pub fn operator_alert_message(detail: &str) -> NotificationMessage {
    NotificationMessage {
        subject: "Heirloom: operator attention required".to_string(),
        body: format!(
            r#"An engine condition needs review:

{detail}

Check the activity log for full context.
"#
        ),
    }
}
