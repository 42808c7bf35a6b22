//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `monitor` - End-to-end monitoring state machine
//! - `broadcast` - Emergency broadcast coordination and retry
//! - `impact` - Threshold impact classification
//! - `countdown` - Cancellable confirmation countdown

pub mod broadcast;
pub mod countdown;
pub mod impact;
pub mod monitor;

// Re-export commonly used types
pub use broadcast::{BroadcastCoordinator, BroadcastError};
pub use countdown::{ConfirmationTimer, CountdownOutcome};
pub use impact::ImpactDetector;
pub use monitor::{MonitorLoop, MonitorState};
