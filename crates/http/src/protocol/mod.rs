//! Protocol types shared by the codec and the connection layer.
//!
//! The frame model splits every HTTP message into a header frame followed by
//! zero or more payload frames ending with an EOF marker. The codec produces
//! and consumes these frames; the connection sequences them.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHead;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
