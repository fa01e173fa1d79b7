//! Level data: gameplay parameters plus the static geometry the physics world
//! is built from. Levels are loaded once at startup.

use marble_shared::config::GameplayParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LevelError {
    #[error("failed to read level {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse level: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid level: {0}")]
    Invalid(String),
}

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    fn is_valid(&self) -> bool {
        (0..3).all(|i| {
            self.min[i].is_finite() && self.max[i].is_finite() && self.min[i] <= self.max[i]
        })
    }
}

/// Terrain height samples, row-major: `depth` rows (along Z) of `width`
/// samples (along X), spaced `grid_distance` apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightGrid {
    pub width: usize,
    pub depth: usize,
    pub grid_distance: f32,
    pub heights: Vec<f32>,
}

impl HeightGrid {
    /// Sample at (column, row)
    pub fn height_at(&self, column: usize, row: usize) -> f32 {
        self.heights[row * self.width + column]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Functionality {
    Static,
    Dynamic,
    StartGate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum ShapeDef {
    Box { width: f32, height: f32, depth: f32 },
    Sphere { radius: f32 },
}

impl ShapeDef {
    pub fn height(&self) -> f32 {
        match *self {
            ShapeDef::Box { height, .. } => height,
            ShapeDef::Sphere { radius } => radius * 2.0,
        }
    }
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

/// A primitive collider placed in the level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColliderDef {
    pub functionality: Functionality,
    #[serde(flatten)]
    pub shape: ShapeDef,
    pub position: [f32; 3],
    /// Quaternion, xyzw
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelData {
    pub id: String,
    pub gameplay: GameplayParams,
    pub terrain: HeightGrid,
    #[serde(default)]
    pub colliders: Vec<ColliderDef>,
    pub spawn_area: Aabb,
    pub finish_area: Aabb,
}

impl LevelData {
    pub fn load(path: &Path) -> Result<Self, LevelError> {
        let text = std::fs::read_to_string(path).map_err(|source| LevelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let level = Self::from_json(&text)?;
        tracing::info!(
            "Loaded level '{}' from {} ({} colliders)",
            level.id,
            path.display(),
            level.colliders.len()
        );
        Ok(level)
    }

    pub fn from_json(text: &str) -> Result<Self, LevelError> {
        let level: LevelData = serde_json::from_str(text)?;
        level.validate()?;
        Ok(level)
    }

    /// Checks parameters and areas. Collider geometry is checked when the
    /// physics world is built.
    pub fn validate(&self) -> Result<(), LevelError> {
        if self.id.is_empty() {
            return Err(LevelError::Invalid("level id is empty".to_string()));
        }
        self.gameplay.validate().map_err(LevelError::Invalid)?;
        if !self.spawn_area.is_valid() {
            return Err(LevelError::Invalid("spawn area is malformed".to_string()));
        }
        if !self.finish_area.is_valid() {
            return Err(LevelError::Invalid("finish area is malformed".to_string()));
        }
        Ok(())
    }

    /// Built-in practice track: a long slope with side walls, one start gate
    /// below the spawn area and a finish zone at the bottom.
    pub fn builtin() -> Self {
        const WIDTH: usize = 32;
        const DEPTH: usize = 64;
        const SLOPE: f32 = 0.3;

        let mut heights = Vec::with_capacity(WIDTH * DEPTH);
        for row in 0..DEPTH {
            for column in 0..WIDTH {
                // Shallow trough so marbles drift to the centre line
                let dx = column as f32 - (WIDTH - 1) as f32 / 2.0;
                heights.push((DEPTH - 1 - row) as f32 * SLOPE + dx * dx * 0.01);
            }
        }

        let wall = |x: f32| ColliderDef {
            functionality: Functionality::Static,
            shape: ShapeDef::Box {
                width: 0.5,
                height: 24.0,
                depth: DEPTH as f32,
            },
            position: [x, 10.0, 0.0],
            rotation: identity_rotation(),
        };

        Self {
            id: "slope".to_string(),
            gameplay: GameplayParams::default(),
            terrain: HeightGrid {
                width: WIDTH,
                depth: DEPTH,
                grid_distance: 1.0,
                heights,
            },
            colliders: vec![
                wall(-5.25),
                wall(5.25),
                ColliderDef {
                    functionality: Functionality::StartGate,
                    shape: ShapeDef::Box {
                        width: 10.0,
                        height: 3.0,
                        depth: 0.5,
                    },
                    position: [0.0, 18.75, -26.0],
                    rotation: identity_rotation(),
                },
            ],
            spawn_area: Aabb {
                min: [-4.0, 19.5, -30.0],
                max: [4.0, 21.0, -27.0],
            },
            finish_area: Aabb {
                min: [-16.0, -5.0, 27.0],
                max: [16.0, 10.0, 32.0],
            },
        }
    }
}
