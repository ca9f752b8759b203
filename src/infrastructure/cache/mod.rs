pub mod photo_store;

pub use photo_store::{PhotoSnapshot, PhotoStore, SharedPhotoStore};
