/// How a response status should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// 429 and 5xx.
    Retryable,
    NotFound,
    /// Every other non-2xx status.
    Permanent,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 | 410 => StatusClass::NotFound,
        429 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Permanent,
    }
}
