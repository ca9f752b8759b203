pub mod notification;
pub mod photo;

pub use notification::{ChangeEvent, ChangeKind, DecodeError, RawNotification};
pub use photo::{MediaType, Photo, PhotoPatch};
