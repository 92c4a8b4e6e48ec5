use chrono::offset::Utc;

/// The current time in the unit the signed deadlines use.
pub fn now_in_epoch_seconds() -> u64 {
    u64::try_from(Utc::now().timestamp()).expect("now is not before the epoch")
}
