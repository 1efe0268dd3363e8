mod dispatch;
mod error;
mod filter;
mod iface;
mod options;
mod queue;
mod sentence;
mod tag;

pub use dispatch::{READ_CHUNK, do_read};
pub use error::CoreError;
pub use filter::Filter;
pub use iface::{Direction, Engine, ID_MINOR_MASK, IfFlags, Iface, IfaceId};
pub use options::Options;
pub use queue::SentenceQueue;
pub use sentence::{SENTENCE_MAX, Sentence, nmea_checksum};
pub use tag::{TAG_MAX, gettag};
