use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Horizontal/vertical gap left between auto-placed shapes.
pub const SHAPE_SPACING: f64 = 20.0;
/// Default width for text shapes created by the reverse path.
pub const DEFAULT_WIDTH: f64 = 200.0;
/// Default height for text shapes created by the reverse path.
pub const DEFAULT_TEXT_HEIGHT: f64 = 200.0;
pub const DEFAULT_FRAME_WIDTH: f64 = 320.0;
pub const DEFAULT_FRAME_HEIGHT: f64 = 200.0;
/// Padding from a frame's left edge to the first grid cell inside it.
pub const FRAME_INNER_PADDING: f64 = 40.0;
/// Vertical offset below a frame's header strip where children may start.
pub const FRAME_HEADER_OFFSET: f64 = 56.0;
/// Images are displayed no larger than this on either axis (aspect preserved).
pub const MAX_IMAGE_DISPLAY_DIM: f64 = 480.0;
/// Maximum number of grid cells per row when placing inside a frame.
pub const FRAME_GRID_COLS: usize = 5;
/// Dimensions used for an image whose file couldn't be decoded.
pub const FALLBACK_IMAGE_DIMS: (f64, f64) = (300.0, 200.0);

/// File extensions treated as text files on the canvas.
pub const TEXT_EXTENSIONS: [&str; 2] = ["txt", "md"];
/// File extensions treated as images on the canvas. Anything else is invisible.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "webp", "gif", "svg"];

/// The suffix (before `.png`) reserved for annotation exports.
pub const ANNOTATED_SUFFIX: &str = "_annotated";

/// The identifier of a shape on the canvas. These are minted by whichever side creates the shape
/// first and are otherwise treated as completely opaque strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(pub String);
impl ShapeId {
    /// Mints a fresh shape identifier in the editor's `shape:<uuid>` convention.
    pub fn mint() -> Self {
        Self(format!("shape:{}", Uuid::new_v4()))
    }
}
impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl From<&str> for ShapeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The identifier of an asset record (the binary backing of an image shape).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);
impl AssetId {
    pub fn mint() -> Self {
        Self(format!("asset:{}", Uuid::new_v4()))
    }
}
impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kinds of shape that map one-to-one to filesystem entries. Everything else on the canvas
/// (arrows, freehand strokes) is invisible to the workspace, surfaced only through derived facts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    /// A shape displaying a filename label plus text contents (`.txt`/`.md`).
    NamedText,
    /// An image shape backed by an asset.
    Image,
    /// A grouping shape corresponding to a top-level subdirectory. Frames are flat: they never
    /// contain other frames.
    Frame,
}

/// Every type of shape the editor store can hold. Only the first three participate in the
/// canvas-file mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShapeType {
    NamedText,
    Image,
    Frame,
    Draw,
    Arrow,
    /// Any editor shape type we don't participate in syncing. Carried verbatim.
    Other(String),
}
impl ShapeType {
    /// The file-mapped kind of this shape type, if it has one.
    pub fn file_kind(&self) -> Option<ShapeKind> {
        match self {
            ShapeType::NamedText => Some(ShapeKind::NamedText),
            ShapeType::Image => Some(ShapeKind::Image),
            ShapeType::Frame => Some(ShapeKind::Frame),
            _ => None,
        }
    }
}
impl From<String> for ShapeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "named-text" => ShapeType::NamedText,
            "image" => ShapeType::Image,
            "frame" => ShapeType::Frame,
            "draw" => ShapeType::Draw,
            "arrow" => ShapeType::Arrow,
            _ => ShapeType::Other(s),
        }
    }
}
impl From<ShapeType> for String {
    fn from(ty: ShapeType) -> Self {
        match ty {
            ShapeType::NamedText => "named-text".to_string(),
            ShapeType::Image => "image".to_string(),
            ShapeType::Frame => "frame".to_string(),
            ShapeType::Draw => "draw".to_string(),
            ShapeType::Arrow => "arrow".to_string(),
            ShapeType::Other(s) => s,
        }
    }
}

/// The properties of a shape the sync core reads and writes. Everything the editor attaches
/// beyond these survives verbatim in [`ShapeRecord::extra`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeProps {
    /// The display name (filename stem for text shapes, directory name for frames).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The text contents of a text shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
    /// The asset an image shape is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<AssetId>,
    /// For arrows: the shape the tail is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_bind: Option<ShapeId>,
    /// For arrows: the shape the head is bound to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_bind: Option<ShapeId>,
    /// For freehand strokes: points relative to the shape's origin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<(f64, f64)>,
}

/// A single shape record from the editor store. The core treats these as opaque tagged records:
/// it touches only the fields named here and persists the rest verbatim through `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeRecord {
    pub id: ShapeId,
    #[serde(rename = "type")]
    pub ty: ShapeType,
    /// The containing frame, or [`None`] for shapes directly on the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ShapeId>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default)]
    pub props: ShapeProps,
    /// Whatever else the editor put on the record. Round-trips untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
fn default_opacity() -> f64 {
    1.0
}
impl ShapeRecord {
    /// Creates a bare record of the given type with defaults everywhere else.
    pub fn new(id: ShapeId, ty: ShapeType) -> Self {
        Self {
            id,
            ty,
            parent_id: None,
            x: 0.0,
            y: 0.0,
            opacity: 1.0,
            props: ShapeProps::default(),
            extra: serde_json::Map::new(),
        }
    }
    /// The effective size of this shape, falling back to per-type defaults where the editor
    /// hasn't set one yet.
    pub fn size(&self) -> (f64, f64) {
        let (dw, dh) = match self.ty {
            ShapeType::Frame => (DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT),
            _ => (DEFAULT_WIDTH, DEFAULT_TEXT_HEIGHT),
        };
        (
            if self.props.w > 0.0 { self.props.w } else { dw },
            if self.props.h > 0.0 { self.props.h } else { dh },
        )
    }
    /// This shape's bounding box in its parent's coordinate space.
    pub fn bounds(&self) -> Rect {
        let (w, h) = self.size();
        Rect {
            x: self.x,
            y: self.y,
            w,
            h,
        }
    }
}

/// An asset record: the binary backing for image shapes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: AssetId,
    /// Where the editor can load the bytes from. Unset until upload completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// The image's native pixel width, as decoded.
    #[serde(default)]
    pub native_w: f64,
    #[serde(default)]
    pub native_h: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An axis-aligned rectangle in page space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}
impl Rect {
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }
    /// The smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.w).max(other.x + other.w);
        let bottom = (self.y + self.h).max(other.y + other.h);
        Rect {
            x,
            y,
            w: right - x,
            h: bottom - y,
        }
    }
}

/// Returns the extension of a relative path, lowercased, if it has one.
pub fn extension(path: &str) -> Option<String> {
    let base = basename(path);
    base.rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// The final component of a relative path.
pub fn basename(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, b)| b).unwrap_or(path)
}

/// The directory component of a relative path, if it's nested.
pub fn parent_dir(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(d, _)| d)
}

/// Splits a path into everything up to the extension and the extension itself. The first element
/// keeps the directory component.
pub fn stem_and_ext(path: &str) -> (&str, Option<&str>) {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !basename(stem).is_empty() => (stem, Some(ext)),
        _ => (path, None),
    }
}

pub fn is_text_path(path: &str) -> bool {
    extension(path).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_image_path(path: &str) -> bool {
    extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Whether this path is a reserved annotation export (`<stem>_annotated.png`). These are managed
/// internally and must never surface as shapes.
pub fn is_annotated_path(path: &str) -> bool {
    let (stem, ext) = stem_and_ext(path);
    ext == Some("png") && stem.ends_with(ANNOTATED_SUFFIX)
}

/// The annotation export path for the given image path.
pub fn annotated_path(image_path: &str) -> String {
    let (stem, _) = stem_and_ext(image_path);
    format!("{stem}{ANNOTATED_SUFFIX}.png")
}

/// The prompt sidecar path for the given image path (`<stem>-prompt.txt`).
pub fn prompt_path_for_image(image_path: &str) -> String {
    let (stem, _) = stem_and_ext(image_path);
    format!("{stem}-prompt.txt")
}

/// A standalone prompt file name, stamped with the current time.
pub fn timestamped_prompt_path() -> String {
    // Colons aren't filename-safe everywhere
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
    format!("prompt-{stamp}.txt")
}

/// Converts a text shape's display name to its file path within the given parent directory (or at
/// the root if there is none).
pub fn name_to_txt(name: &str, parent: Option<&str>) -> String {
    match parent {
        Some(dir) => format!("{dir}/{name}.txt"),
        None => format!("{name}.txt"),
    }
}

/// The display name for a path: the basename without its extension.
pub fn path_to_name(path: &str) -> &str {
    let base = basename(path);
    stem_and_ext(base).0
}

/// Whether any segment of the path is hidden (starts with `.`).
pub fn is_hidden(path: &str) -> bool {
    path.split('/').any(|seg| seg.starts_with('.'))
}

/// The file-mapped shape kind a filesystem entry at this path would correspond to, if any.
/// Entries nested more than one directory deep are invisible to the canvas.
pub fn kind_for_path(path: &str, is_directory: bool) -> Option<ShapeKind> {
    let depth = path.split('/').count();
    if is_directory {
        // Frames are flat: only top-level directories are represented
        (depth == 1).then_some(ShapeKind::Frame)
    } else if depth > 2 {
        None
    } else if is_text_path(path) {
        Some(ShapeKind::NamedText)
    } else if is_image_path(path) {
        Some(ShapeKind::Image)
    } else {
        None
    }
}
