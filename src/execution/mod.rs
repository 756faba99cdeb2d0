// Trade lifecycle: buy, confirm, ladder, monitor, exit
pub mod engine;
pub mod events;
pub mod ladder;
pub mod monitor;
pub mod processor;
pub mod session;

pub use engine::{EngineSettings, TradeEngine};
pub use events::{EventSink, SessionEvent};
pub use ladder::LadderError;
pub use monitor::MonitorLoop;
pub use processor::{ProcessorSummary, SignalProcessor};
pub use session::{SessionError, SessionPhase, SessionReport, TradeSession};
