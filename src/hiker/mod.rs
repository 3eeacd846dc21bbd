//! Client for the third-party clips metadata API.

mod client;
mod models;

pub use client::{HikerClient, CLIPS_PATH, PROFILE_PATH};
pub use models::{ClipMedia, ClipsPage, UserProfile};
