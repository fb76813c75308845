//! Stream session orchestration: codec and hardware detection, transcoder
//! supervision and the single-active-session registry.

pub mod cache;
pub mod capability;
pub mod clock;
pub mod error;
pub mod mode;
pub mod probe;
pub mod process;
pub mod registry;
pub mod session;
pub mod supervisor;

pub use capability::{CapabilityProbe, CommandCapabilityProbe, HardwareCapabilityDetector};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StreamError, StreamResult};
pub use mode::{ModePolicy, TranscodeMode};
pub use probe::{CodecInspector, FfprobeProber, StreamProber};
pub use process::{ProcessExit, TranscoderProcess};
pub use registry::StreamSessionRegistry;
pub use session::{ChannelStreamSession, SessionInfo, SessionState};
pub use supervisor::{
    build_transcode_args, is_segment_file_name, ProcessOutcome, SupervisorSettings,
    TranscoderSupervisor, MANIFEST_FILE_NAME, SEGMENT_URL_PREFIX,
};
