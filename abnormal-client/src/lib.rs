/*!
Client for the Abnormal Security threats API: the paginated threat listing
and the per-threat detail lookup.
*/

pub mod client;
pub mod error;
pub mod models;
pub mod window;

pub use client::{AbnormalClient, DEFAULT_BASE_URL};
pub use error::ApiError;
pub use models::{ThreatDetail, ThreatPage, ThreatSummary};
pub use window::TimeWindow;
