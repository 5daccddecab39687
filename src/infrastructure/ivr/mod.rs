/// Interactive Voice Response (IVR) system
pub mod dtmf;
pub mod flow;
pub mod menu;

pub use dtmf::{run_audio_drain, run_dtmf_reader, DtmfBuffer, DtmfDigit, DtmfExtractor, PushOutcome, TelephoneEvent};
pub use flow::{IvrInterpreter, IvrNext, IvrStep};
pub use menu::{ExhaustedPolicy, IvrMenuBuilder, IvrMenuTree, MenuAction, MenuError, NodeId};
