//! howsample-services: Signal graph, playback, mixdown and export

pub mod audio_io;
mod decode;
pub mod device;
mod export;
pub mod graph;
pub mod mixdown;
pub mod pitch_shift;
mod scheduler;
mod wav;

pub use audio_io::{AudioOutputError, CpalDevice};
pub use decode::{decode_wav, load_sample_file, resample, DecodeError};
pub use device::{AudioDevice, HeadlessDevice};
pub use export::{export_mix, write_export, write_export_to, ExportError, EXPORT_FILENAME};
pub use graph::{GraphEvent, VoiceHandle, VoiceId};
pub use mixdown::{MixdownRenderer, RenderConfig, RenderError, RenderedBuffer};
pub use pitch_shift::{StageConfig, PITCH_SHIFT_STAGE};
pub use scheduler::{PlayReport, Scheduler, SchedulerError};
pub use wav::{encode_wav, quantize, WavError, WAV_HEADER_LEN};
