//! Collaborators supplied by the host: the scripting runtime and the most
//! recently loaded gamma table.

use std::fmt;

use stimpipe_core::ImagingError;

/// Value injected into the host runtime's namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Scalar(f64),
    /// Column-major `rows x cols` matrix.
    Matrix {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
}

/// Interpreter that runtime-callback entries evaluate their code in.
pub trait HostRuntime: fmt::Debug {
    fn evaluate(&mut self, code: &str) -> Result<(), ImagingError>;
    fn set_named_variable(&mut self, scope: &str, name: &str, value: HostValue) -> Result<(), ImagingError>;
}

/// Default collaborator: runtime callbacks fail, one entry at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostRuntime;

impl HostRuntime for NoHostRuntime {
    fn evaluate(&mut self, code: &str) -> Result<(), ImagingError> {
        Err(ImagingError::Unsupported(format!(
            "no host runtime attached to evaluate '{code}'"
        )))
    }

    fn set_named_variable(&mut self, _scope: &str, name: &str, _value: HostValue) -> Result<(), ImagingError> {
        Err(ImagingError::Unsupported(format!(
            "no host runtime attached to receive '{name}'"
        )))
    }
}

/// Hardware gamma table: three equally long channels of values in 0..=1.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaTable {
    channels: [Vec<f32>; 3],
}

impl GammaTable {
    pub fn new(red: Vec<f32>, green: Vec<f32>, blue: Vec<f32>) -> Result<Self, ImagingError> {
        if red.is_empty() || red.len() != green.len() || red.len() != blue.len() {
            return Err(ImagingError::Precondition(
                "gamma table channels must be non-empty and equally long".to_string(),
            ));
        }
        Ok(Self {
            channels: [red, green, blue],
        })
    }

    /// Identity ramp with `n` slots.
    pub fn linear(n: usize) -> Self {
        let ramp: Vec<f32> = (0..n)
            .map(|i| if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 })
            .collect();
        Self {
            channels: [ramp.clone(), ramp.clone(), ramp],
        }
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        &self.channels[c]
    }

    /// The table as a 3 x N host matrix, one row per channel.
    pub fn to_host_value(&self) -> HostValue {
        let n = self.len();
        let mut data = Vec::with_capacity(3 * n);
        for i in 0..n {
            for ch in &self.channels {
                data.push(ch[i] as f64);
            }
        }
        HostValue::Matrix { rows: 3, cols: n, data }
    }
}

/// Gamma table handoff between the host's table loads and the pipeline.
#[derive(Debug, Clone, Default)]
pub struct GammaState {
    /// Loaded since the last upload, not yet consumed.
    pub pending: Option<GammaTable>,
    /// Most recently loaded table, kept after upload.
    pub loaded: Option<GammaTable>,
}

impl GammaState {
    pub fn set(&mut self, table: GammaTable) {
        self.loaded = Some(table.clone());
        self.pending = Some(table);
    }
}

pub const MACRO_GAMMATABLE: &str = "IMAGINGPIPE_GAMMATABLE";
pub const MACRO_FLIPCOUNT: &str = "IMAGINGPIPE_FLIPCOUNT";

/// Expand the placeholder tokens of a callback parameter string.
///
/// `IMAGINGPIPE_GAMMATABLE` injects the pending gamma table as a host
/// variable of that name; without one the expansion fails.
/// `IMAGINGPIPE_FLIPCOUNT` is injected the same way and also replaced
/// in the text by the counter value.
pub fn expand_macros(
    params: &str,
    host: &mut dyn HostRuntime,
    gamma: &GammaState,
    flip_count: u64,
) -> Result<String, ImagingError> {
    if params.contains(MACRO_GAMMATABLE) {
        let table = gamma.pending.as_ref().ok_or_else(|| {
            ImagingError::Precondition(format!("{MACRO_GAMMATABLE} used but no gamma table is pending"))
        })?;
        host.set_named_variable("base", MACRO_GAMMATABLE, table.to_host_value())?;
    }
    if params.contains(MACRO_FLIPCOUNT) {
        host.set_named_variable("base", MACRO_FLIPCOUNT, HostValue::Scalar(flip_count as f64))?;
        return Ok(params.replace(MACRO_FLIPCOUNT, &flip_count.to_string()));
    }
    Ok(params.to_string())
}
