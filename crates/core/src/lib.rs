pub mod config;
pub mod info;
pub mod session;
pub mod view;

pub use config::Config;
pub use info::{SourceSummary, describe_duration};
pub use session::{Intent, PreviewError, PreviewEvent, Previewer, RenderFrame};
pub use view::ViewModel;

pub use audition_decode::{DecodeError, SourceHandle, SourceInfo};
pub use audition_engine::{TransportEvent, TransportProcessor};
pub use audition_transport::{AudioArc, TransportState};
pub use audition_waveform::{Column, Peak, PeakQuery, SummaryConfig};
