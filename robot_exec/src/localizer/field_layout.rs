//! Fiducial field layout

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::vision::Transform3;
use serde::Deserialize;
use std::collections::HashMap;
use util::{geom::Pose3d, params};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Poses of every fiducial on the field, in the blue alliance origin frame.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    /// Units: meters
    pub length_m: f64,

    /// Units: meters
    pub width_m: f64,

    tags: HashMap<i32, Pose3d>,
}

#[derive(Deserialize)]
struct LayoutFile {
    field: FieldSize,
    tags: Vec<LayoutTag>,
}

#[derive(Deserialize)]
struct FieldSize {
    length_m: f64,
    width_m: f64,
}

#[derive(Deserialize)]
struct LayoutTag {
    id: i32,
    pose: Transform3,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FieldLayout {
    /// Load a layout from a JSON file in the params directory.
    pub fn load(file_name: &str) -> Result<Self, params::LoadError> {
        let file: LayoutFile = params::load_json(file_name)?;
        Ok(Self::from(file))
    }

    /// Parse a layout from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: LayoutFile = serde_json::from_str(json)?;
        Ok(Self::from(file))
    }

    /// Pose of fiducial `id` on the field.
    pub fn tag_pose(&self, id: i32) -> Option<Pose3d> {
        self.tags.get(&id).copied()
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    /// Ids and poses of every fiducial, sorted by id.
    pub fn tags(&self) -> Vec<(i32, Pose3d)> {
        let mut tags: Vec<_> = self.tags.iter().map(|(id, p)| (*id, *p)).collect();
        tags.sort_by_key(|(id, _)| *id);
        tags
    }
}

impl From<LayoutFile> for FieldLayout {
    fn from(file: LayoutFile) -> Self {
        Self {
            length_m: file.field.length_m,
            width_m: file.field.width_m,
            tags: file
                .tags
                .iter()
                .map(|t| (t.id, Pose3d::from(&t.pose)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_shipped_layout() {
        let layout = FieldLayout::from_json(include_str!("../../../params/field_layout.json")).unwrap();
        assert_eq!(layout.num_tags(), 22);
        assert!((layout.length_m - 17.548).abs() < 1e-9);

        // Tag 7 faces down the field from the red reef
        let t7 = layout.tag_pose(7).unwrap().to_pose2d();
        assert!((t7.x_m - 13.8905).abs() < 1e-3);
        assert!((t7.y_m - 4.0259).abs() < 1e-3);
        assert!(t7.heading.degrees().abs() < 1e-3);

        let t10 = layout.tag_pose(10).unwrap().to_pose2d();
        assert!((t10.heading.degrees().abs() - 180.0).abs() < 1e-3);

        assert!(layout.tag_pose(23).is_none());
        assert_eq!(layout.tags()[0].0, 1);
    }
}
