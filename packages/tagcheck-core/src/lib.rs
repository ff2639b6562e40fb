//! Validation orchestration engine for captured tracking-event traffic.
//!
//! Given a crawl of a site (pages plus the analytics requests they fired),
//! this crate runs a configurable set of data-quality validators and streams
//! progress to any number of observers.
//!
//! # Architecture
//!
//! ```text
//! RunController
//!   ├─ CrawlSubsystem      (external; produces a Dataset)
//!   ├─ ValidatorRegistry   (selected validators, run one at a time)
//!   │    └─ no_duplicate_events -> DuplicateDetector
//!   └─ ProgressBus         (ordered, replayable events per session)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tagcheck_core::{
//!     DatasetFileCrawler, RunController, RunRequest, ValidatorRegistry, ValidatorSettings,
//! };
//!
//! let registry = ValidatorRegistry::with_defaults(&ValidatorSettings::default())?;
//! let controller = RunController::new(
//!     Arc::new(registry),
//!     Arc::new(DatasetFileCrawler::new("capture.json")),
//! );
//!
//! let summary = controller.run(RunRequest::new("https://example.com")).await?;
//! println!("{}/{} passed", summary.passed, summary.total);
//! ```

pub mod controller;
pub mod crawl;
pub mod dataset;
pub mod duplicate;
pub mod error;
pub mod payload;
pub mod progress;
pub mod registry;
pub mod result;
pub mod testing;
pub mod validator;
pub mod validators;

pub use controller::{PreparedRun, RunController, RunRequest, RunSession, RunState, RunSummary};
pub use crawl::{CrawlBounds, CrawlRequest, CrawlSubsystem, DatasetFileCrawler};
pub use dataset::{CapturedPage, CapturedRequest, Dataset, NetworkExchange, NetworkRequestRecord};
pub use duplicate::{canonicalize, payload_digest, DuplicateCluster, DuplicateDetector};
pub use error::{
    BusError, CrawlError, CrawlResult, DatasetError, DatasetResult, RegistryError,
    RegistryResult, RunError, ValidatorError,
};
pub use progress::{
    EventStatus, EventType, ProgressBus, ProgressEvent, ProgressUpdate, Subscription,
};
pub use registry::{EcidScope, ValidatorRegistry, ValidatorSettings};
pub use result::{Details, ValidationResult, ValidatorDescriptor, Violation};
pub use validator::Validator;
