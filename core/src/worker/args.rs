//! Positional launch arguments shared by the host and the worker binary.
//!
//! `<mode> <segmentKey> <segmentSize> <filePath|-> <slotIndex> <workerCount> <engineSequence|->`

use std::ffi::OsString;
use std::path::PathBuf;

use crate::constants::MAX_WORKERS;
use crate::types::CipherMode;
use crate::worker::launch::LaunchError;

const ARG_COUNT: usize = 7;
const NONE_MARKER: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    pub mode: CipherMode,
    pub segment_key: u32,
    pub segment_size: usize,
    /// Source file for topologies where workers read input themselves.
    pub file_path: Option<PathBuf>,
    pub slot_index: usize,
    pub worker_count: usize,
    pub engine_sequence: Option<String>,
}

impl WorkerInvocation {
    pub fn to_args(&self) -> Vec<OsString> {
        let optional = |v: Option<OsString>| v.unwrap_or_else(|| NONE_MARKER.into());
        vec![
            self.mode.as_flag().into(),
            self.segment_key.to_string().into(),
            self.segment_size.to_string().into(),
            optional(self.file_path.clone().map(PathBuf::into_os_string)),
            self.slot_index.to_string().into(),
            self.worker_count.to_string().into(),
            optional(self.engine_sequence.clone().map(OsString::from)),
        ]
    }

    pub fn from_args<I, S>(args: I) -> Result<Self, LaunchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        if args.len() != ARG_COUNT {
            return Err(LaunchError::InvalidArgs(format!(
                "expected {ARG_COUNT} arguments, got {}",
                args.len()
            )));
        }

        let text = |i: usize, name: &str| -> Result<&str, LaunchError> {
            args[i]
                .to_str()
                .ok_or_else(|| LaunchError::InvalidArgs(format!("{name} is not valid UTF-8")))
        };
        let number = |i: usize, name: &str| -> Result<u64, LaunchError> {
            let raw = text(i, name)?;
            raw.parse()
                .map_err(|_| LaunchError::InvalidArgs(format!("{name} {raw:?} is not a number")))
        };

        let mode_raw = text(0, "mode")?;
        let mode = CipherMode::from_flag(mode_raw)
            .ok_or_else(|| LaunchError::InvalidArgs(format!("mode must be 0 or 1, got {mode_raw:?}")))?;

        let segment_key = u32::try_from(number(1, "segment key")?)
            .map_err(|_| LaunchError::InvalidArgs("segment key exceeds u32".into()))?;
        let segment_size = number(2, "segment size")? as usize;

        let file_path = match args[3].to_str() {
            Some(NONE_MARKER) => None,
            _ => Some(PathBuf::from(&args[3])),
        };

        let slot_index = number(4, "slot index")? as usize;
        let worker_count = number(5, "worker count")? as usize;
        if worker_count == 0 || worker_count > MAX_WORKERS {
            return Err(LaunchError::InvalidArgs(format!(
                "worker count {worker_count} outside 1..={MAX_WORKERS}"
            )));
        }
        if slot_index >= worker_count {
            return Err(LaunchError::InvalidArgs(format!(
                "slot index {slot_index} >= worker count {worker_count}"
            )));
        }

        let engine_sequence = match text(6, "engine sequence")? {
            NONE_MARKER => None,
            seq => Some(seq.to_string()),
        };

        Ok(Self {
            mode,
            segment_key,
            segment_size,
            file_path,
            slot_index,
            worker_count,
            engine_sequence,
        })
    }
}
