use thiserror::Error;

use crate::tag::TAG_MAX;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid filter rule {0:?}")]
    BadFilterRule(String),
    #[error("tag block does not fit in {TAG_MAX} bytes")]
    TagOverflow,
    #[error("system clock is before the unix epoch")]
    ClockSkew,
}
