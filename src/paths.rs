use snafu::{ResultExt, Snafu};

use crate::channels::{ChannelSpec, NIFTI_EXT};
use crate::manifest::{Manifest, ManifestError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PathError {
    #[snafu(display("Invalid subject identifier: {:?}", identifier))]
    InvalidIdentifier { identifier: String },

    #[snafu(display("{}", source))]
    Manifest {
        #[snafu(source(from(ManifestError, Box::new)))]
        source: Box<ManifestError>,
    },
}

/// Check that an identifier is usable as a path segment. An empty id or one
/// containing a path separator indicates a corrupt manifest.
pub fn validate_identifier(identifier: &str) -> Result<(), PathError> {
    if identifier.is_empty() || identifier.contains(['/', '\\']) {
        return InvalidIdentifierSnafu { identifier }.fail();
    }
    Ok(())
}

/// Synthesize the relative path for every channel of one subject, in channel
/// order. Paths follow the `TYPE/ID/ID_suffix.nii.gz` layout; the category
/// segment is omitted when `category` is empty.
pub fn synthesize_paths(
    identifier: &str,
    category: &str,
    channels: &[ChannelSpec],
) -> Result<Vec<(String, String)>, PathError> {
    validate_identifier(identifier)?;
    let prefix = if category.is_empty() {
        String::new()
    } else {
        format!("{}/", category)
    };
    Ok(channels
        .iter()
        .map(|spec| {
            let path = format!(
                "{}{}/{}_{}{}",
                prefix, identifier, identifier, spec.suffix, NIFTI_EXT
            );
            (spec.column.clone(), path)
        })
        .collect())
}

/// Fill every channel column of the manifest with synthesized paths,
/// creating missing columns first. Returns a new manifest value; the input
/// is consumed rather than mutated in place.
pub fn fill_paths(
    manifest: Manifest,
    id_column: &str,
    category_column: &str,
    channels: &[ChannelSpec],
) -> Result<Manifest, PathError> {
    let mut manifest = manifest.reconcile(channels);
    let id_idx = manifest.require_column(id_column).context(ManifestSnafu)?;
    let category_idx = manifest.column_index(category_column);

    let mut channel_indices = Vec::with_capacity(channels.len());
    for spec in channels {
        let idx = manifest
            .require_column(&spec.column)
            .context(ManifestSnafu)?;
        channel_indices.push(idx);
    }

    for row in 0..manifest.num_rows() {
        let identifier = manifest.value(row, id_idx).to_string();
        let category = category_idx
            .map(|idx| manifest.value(row, idx).to_string())
            .unwrap_or_default();
        let synthesized = synthesize_paths(&identifier, &category, channels)?;
        for (&idx, (_, path)) in channel_indices.iter().zip(synthesized) {
            manifest.set(row, idx, path);
        }
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_synthesize_with_category() {
        let channels = vec![ChannelSpec::new("T1", "t1")];
        let paths = synthesize_paths("Brats_001", "HGG", &channels).unwrap();
        assert_eq!(
            paths,
            vec![(
                "T1".to_string(),
                "HGG/Brats_001/Brats_001_t1.nii.gz".to_string()
            )]
        );
    }

    #[test]
    fn test_synthesize_without_category() {
        let channels = vec![ChannelSpec::new("T2", "t2")];
        let paths = synthesize_paths("Brats_001", "", &channels).unwrap();
        assert_eq!(paths[0].1, "Brats_001/Brats_001_t2.nii.gz");
    }

    #[test]
    fn test_synthesize_preserves_channel_order() {
        let channels = vec![
            ChannelSpec::new("T1", "t1"),
            ChannelSpec::new("FLAIR", "flair"),
            ChannelSpec::new("seg", "seg"),
        ];
        let paths = synthesize_paths("S1", "LGG", &channels).unwrap();
        let columns: Vec<_> = paths.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(columns, ["T1", "FLAIR", "seg"]);
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("a\\b")]
    fn test_invalid_identifiers(#[case] identifier: &str) {
        let channels = vec![ChannelSpec::new("T1", "t1")];
        let result = synthesize_paths(identifier, "HGG", &channels);
        assert!(matches!(
            result,
            Err(PathError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_fill_paths_creates_and_fills_columns() {
        let mut manifest = Manifest::new(vec!["BraTS18ID".to_string(), "type".to_string()]);
        manifest.push_row(vec!["Brats_001".to_string(), "HGG".to_string()]);
        manifest.push_row(vec!["Brats_002".to_string(), "LGG".to_string()]);

        let channels = vec![ChannelSpec::new("T1", "t1"), ChannelSpec::new("T2", "t2")];
        let filled = fill_paths(manifest, "BraTS18ID", "type", &channels).unwrap();

        assert_eq!(filled.columns(), &["BraTS18ID", "type", "T1", "T2"]);
        assert_eq!(
            filled.get(0, "T1"),
            Some("HGG/Brats_001/Brats_001_t1.nii.gz")
        );
        assert_eq!(
            filled.get(1, "T2"),
            Some("LGG/Brats_002/Brats_002_t2.nii.gz")
        );
    }

    #[test]
    fn test_fill_paths_without_category_column() {
        let mut manifest = Manifest::new(vec!["BraTS18ID".to_string()]);
        manifest.push_row(vec!["Brats_001".to_string()]);

        let channels = vec![ChannelSpec::new("T1", "t1")];
        let filled = fill_paths(manifest, "BraTS18ID", "type", &channels).unwrap();
        assert_eq!(filled.get(0, "T1"), Some("Brats_001/Brats_001_t1.nii.gz"));
    }

    #[test]
    fn test_fill_paths_missing_id_column() {
        let manifest = Manifest::new(vec!["type".to_string()]);
        let channels = vec![ChannelSpec::new("T1", "t1")];
        let result = fill_paths(manifest, "BraTS18ID", "type", &channels);
        assert!(matches!(result, Err(PathError::Manifest { .. })));
    }

    #[test]
    fn test_fill_paths_rejects_bad_identifier() {
        let mut manifest = Manifest::new(vec!["BraTS18ID".to_string(), "type".to_string()]);
        manifest.push_row(vec!["bad/id".to_string(), "HGG".to_string()]);

        let channels = vec![ChannelSpec::new("T1", "t1")];
        let result = fill_paths(manifest, "BraTS18ID", "type", &channels);
        assert!(matches!(result, Err(PathError::InvalidIdentifier { .. })));
    }
}
