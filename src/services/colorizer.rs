use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Array3, Array4, ArrayView3};
use ndarray_npy::ReadNpyExt;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::models::config::{AppConfig, BackendKind};
use crate::models::error::{AppError, StartupError};
use crate::services::artifacts::{ArtifactStore, PTS_IN_HULL, ZHANG_MODEL};

/// Input resolution of the learned U-Net.
pub const UNET_INPUT_SIZE: u32 = 128;
/// Input resolution of the classical colorization network.
pub const ZHANG_INPUT_SIZE: u32 = 224;

const AB_BINS: usize = 313;
/// Class-rebalancing temperature for the annealed-mean decode.
const REBALANCE_SCALE: f32 = 2.606;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

pub struct ChromaPrediction {
    /// (h, w, 2) chrominance at the model's output resolution.
    pub ab: Array3<f32>,
    /// Denormalization factor applied after upsampling to the original
    /// resolution.
    pub scale: f32,
}

/// One pretrained colorization model. `l` is the un-normalized Lab lightness
/// (0..100) at `input_size` resolution; each backend applies its own input
/// normalization.
pub trait ColorizeBackend: Send + Sync {
    fn id(&self) -> &'static str;
    fn input_size(&self) -> u32;
    fn output_format(&self) -> OutputFormat;
    fn predict_chroma(&self, l: &Array2<f32>) -> Result<ChromaPrediction, AppError>;
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Holds the backend once startup loading completes. Requests arriving before
/// the install observe `None` and are answered with 503.
pub struct ColorizerService {
    backend: RwLock<Option<Arc<dyn ColorizeBackend>>>,
}

impl ColorizerService {
    pub fn new() -> Self {
        Self {
            backend: RwLock::new(None),
        }
    }

    pub fn install(&self, backend: Arc<dyn ColorizeBackend>) {
        info!(backend = backend.id(), "Colorization backend installed");
        *self.backend.write() = Some(backend);
    }

    pub fn backend(&self) -> Option<Arc<dyn ColorizeBackend>> {
        self.backend.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.read().is_some()
    }
}

impl Default for ColorizerService {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds the configured backend. All artifact fetching, session construction,
/// and cluster-center loading happens here, once; the returned handle is
/// immutable afterwards.
pub async fn load_backend(
    config: &AppConfig,
    store: &ArtifactStore,
) -> Result<Arc<dyn ColorizeBackend>, StartupError> {
    match config.backend {
        BackendKind::Unet => {
            let path = Path::new(&config.unet_model_path);
            if !path.exists() {
                return Err(StartupError::ModelFileMissing(path.to_path_buf()));
            }
            Ok(Arc::new(UnetBackend::from_file(path)?))
        }
        BackendKind::Zhang => {
            let model_path = store.ensure(&ZHANG_MODEL).await?;
            let pts_path = store.ensure(&PTS_IN_HULL).await?;
            Ok(Arc::new(ZhangBackend::from_files(&model_path, &pts_path)?))
        }
    }
}

fn build_session(path: &Path) -> Result<ort::session::Session, StartupError> {
    ort::session::Session::builder()
        .and_then(|b| b.with_intra_threads(2))
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| StartupError::ModelLoad(e.to_string()))
}

fn run_session(
    session: &Mutex<ort::session::Session>,
    input: Array4<f32>,
) -> Result<(Vec<usize>, Vec<f32>), AppError> {
    let input_value = ort::value::Tensor::from_array(input)
        .map_err(|e| AppError::Inference(format!("Failed to create input tensor: {}", e)))?;

    let mut session = session.lock();
    let outputs = session
        .run(ort::inputs![input_value])
        .map_err(|e| AppError::Inference(format!("Forward pass failed: {}", e)))?;
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| AppError::Inference(format!("Failed to extract output: {}", e)))?;

    let dims = shape.iter().map(|&d| d as usize).collect();
    Ok((dims, data.to_vec()))
}

// ---------------------------------------------------------------------------
// U-Net backend (learned model)
// ---------------------------------------------------------------------------

pub struct UnetBackend {
    session: Mutex<ort::session::Session>,
}

impl UnetBackend {
    pub fn from_file(path: &Path) -> Result<Self, StartupError> {
        let session = build_session(path)?;
        info!(path = %path.display(), "U-Net model loaded");
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl ColorizeBackend for UnetBackend {
    fn id(&self) -> &'static str {
        "unet"
    }

    fn input_size(&self) -> u32 {
        UNET_INPUT_SIZE
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn predict_chroma(&self, l: &Array2<f32>) -> Result<ChromaPrediction, AppError> {
        let t = UNET_INPUT_SIZE as usize;
        // NHWC (1, t, t, 1), lightness scaled to 0..1.
        let mut input = Array4::<f32>::zeros((1, t, t, 1));
        for ((y, x), &v) in l.indexed_iter() {
            input[[0, y, x, 0]] = v / 100.0;
        }

        let (dims, data) = run_session(&self.session, input)?;
        if dims.len() != 4 || dims[0] != 1 || dims[3] != 2 {
            return Err(AppError::Inference(format!(
                "Unexpected U-Net output shape {:?}",
                dims
            )));
        }

        let (h, w) = (dims[1], dims[2]);
        let mut ab = Array3::zeros((h, w, 2));
        for y in 0..h {
            for x in 0..w {
                for c in 0..2 {
                    ab[[y, x, c]] = data[(y * w + x) * 2 + c];
                }
            }
        }

        // Prediction is in −1..1; denormalized to Lab range after upsampling.
        Ok(ChromaPrediction { ab, scale: 128.0 })
    }
}

// ---------------------------------------------------------------------------
// Zhang backend (classical network)
// ---------------------------------------------------------------------------

pub struct ZhangBackend {
    session: Mutex<ort::session::Session>,
    /// (313, 2) ab cluster centers from pts_in_hull.npy, loaded once here
    /// rather than patched into a named network layer.
    cluster_centers: Array2<f32>,
}

impl ZhangBackend {
    pub fn from_files(model_path: &Path, pts_path: &Path) -> Result<Self, StartupError> {
        let session = build_session(model_path)?;
        let cluster_centers = read_cluster_centers(pts_path)?;
        info!(path = %model_path.display(), "Classical colorization model loaded");
        Ok(Self {
            session: Mutex::new(session),
            cluster_centers,
        })
    }
}

impl ColorizeBackend for ZhangBackend {
    fn id(&self) -> &'static str {
        "zhang"
    }

    fn input_size(&self) -> u32 {
        ZHANG_INPUT_SIZE
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn predict_chroma(&self, l: &Array2<f32>) -> Result<ChromaPrediction, AppError> {
        let t = ZHANG_INPUT_SIZE as usize;
        // NCHW (1, 1, t, t), lightness centered at zero.
        let mut input = Array4::<f32>::zeros((1, 1, t, t));
        for ((y, x), &v) in l.indexed_iter() {
            input[[0, 0, y, x]] = v - 50.0;
        }

        let (dims, data) = run_session(&self.session, input)?;
        if dims.len() != 4 || dims[0] != 1 || dims[1] != AB_BINS {
            return Err(AppError::Inference(format!(
                "Unexpected colorization output shape {:?}",
                dims
            )));
        }

        let (h, w) = (dims[2], dims[3]);
        let logits = ArrayView3::from_shape((AB_BINS, h, w), &data)
            .map_err(|e| AppError::Inference(format!("Output reshape failed: {}", e)))?;

        // Chrominance comes out in native Lab units, nothing to rescale.
        Ok(ChromaPrediction {
            ab: annealed_mean(logits, &self.cluster_centers),
            scale: 1.0,
        })
    }
}

/// Decodes a per-pixel distribution over the 313 ab bins into concrete ab
/// values: softmax over temperature-scaled logits, then the expectation
/// against the cluster centers. This is the math the original network carried
/// in its two patched layers.
fn annealed_mean(logits: ArrayView3<'_, f32>, centers: &Array2<f32>) -> Array3<f32> {
    let (bins, h, w) = logits.dim();
    let mut ab = Array3::zeros((h, w, 2));
    for y in 0..h {
        for x in 0..w {
            let mut max = f32::NEG_INFINITY;
            for q in 0..bins {
                max = max.max(REBALANCE_SCALE * logits[[q, y, x]]);
            }
            let (mut a, mut b, mut denom) = (0.0f32, 0.0f32, 0.0f32);
            for q in 0..bins {
                let e = (REBALANCE_SCALE * logits[[q, y, x]] - max).exp();
                denom += e;
                a += e * centers[[q, 0]];
                b += e * centers[[q, 1]];
            }
            ab[[y, x, 0]] = a / denom;
            ab[[y, x, 1]] = b / denom;
        }
    }
    ab
}

/// pts_in_hull.npy ships as an integer grid of ab values; older conversions
/// float it. Accept either, require shape (313, 2).
fn read_cluster_centers(path: &Path) -> Result<Array2<f32>, StartupError> {
    let open = |p: &Path| {
        File::open(p).map_err(|e| StartupError::ArtifactIo {
            name: PTS_IN_HULL.filename.to_string(),
            source: e,
        })
    };

    let centers = match Array2::<i64>::read_npy(open(path)?) {
        Ok(arr) => arr.mapv(|v| v as f32),
        Err(_) => Array2::<f64>::read_npy(open(path)?)
            .map_err(|e| StartupError::ModelLoad(format!("pts_in_hull.npy: {}", e)))?
            .mapv(|v| v as f32),
    };

    let (rows, cols) = centers.dim();
    if (rows, cols) != (AB_BINS, 2) {
        return Err(StartupError::BadClusterCenters(vec![rows, cols]));
    }
    Ok(centers)
}
