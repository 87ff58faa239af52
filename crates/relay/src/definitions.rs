//! Metric names recorded by the relay pipeline.

/// Notification counters.
pub mod notifications {
    /// Notifications admitted to the relay queue
    pub const ACCEPTED_TOTAL: &str = "teamsmirror_notifications_accepted_total";
    /// Notifications refused because the queue was full
    pub const REJECTED_TOTAL: &str = "teamsmirror_notifications_rejected_total";
    /// Webhook deliveries whose body could not be parsed
    pub const INVALID_PAYLOADS_TOTAL: &str = "teamsmirror_webhook_invalid_payloads_total";
    /// Messages mirrored back into their chat
    pub const RELAYED_TOTAL: &str = "teamsmirror_notifications_relayed_total";
    /// Notifications dropped by policy (lifecycle, clientState, self-sent, incomplete)
    pub const FILTERED_TOTAL: &str = "teamsmirror_notifications_filtered_total";
    /// Notifications whose fetch or send failed
    pub const FAILED_TOTAL: &str = "teamsmirror_notifications_failed_total";
    /// Notifications abandoned after exceeding the task timeout
    pub const TIMED_OUT_TOTAL: &str = "teamsmirror_notifications_timed_out_total";
}
