//! Wire contracts for the frame pipeline.
//!
//! Two strict v1 schemas travel the bus as UTF-8 JSON: the frame contract,
//! which references pixels in a ring slot, and the result contract, which
//! carries detections and tracks for one `frame_id`. The validators are
//! total functions over decoded JSON that either accept (normalizing legacy
//! version spellings in place) or reject with a stable machine-readable
//! reason code, which doubles as the drop-counter key downstream.

mod frame;
mod reason;
mod redact;
mod result;
mod validate;

pub use frame::{FrameContractV1, FrameMemoryRef};
pub use reason::{ContractValidationError, ReasonCode};
pub use redact::{is_sensitive_key, redact_value};
pub use result::{Detection, ModelInfo, ResultContractV1, Timing};
pub use validate::{validate_frame_contract_v1, validate_result_contract_v1};
