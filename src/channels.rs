//! Channel tables for the `TYPE/ID/ID_suffix.nii.gz` dataset layout.

/// Filename extension shared by every volume in the dataset.
pub const NIFTI_EXT: &str = ".nii.gz";

/// Default name of the subject identifier column.
pub const DEFAULT_ID_COLUMN: &str = "BraTS18ID";

/// Default name of the category column (HGG, LGG, VAL, TEST, ...).
pub const DEFAULT_CATEGORY_COLUMN: &str = "type";

/// Channel columns emitted as per-partition file lists by default. These are
/// the bias-corrected/normalized volumes plus the segmentation and the
/// preprocessing ROI mask consumed by the downstream training framework.
pub const DEFAULT_PARTITION_CHANNELS: &[&str] = &[
    "T1_norm",
    "T2_norm",
    "T1C_norm",
    "FLAIR_norm",
    "seg",
    "preprocess_roi",
];

/// (column, filename suffix) pairs for every channel the path synthesizer
/// manages. A column named `COLNAME` holds `TYPE/ID/ID_SUFFIX.nii.gz`.
const DEFAULT_CHANNEL_TABLE: &[(&str, &str)] = &[
    ("T1", "t1"),
    ("T2", "t2"),
    ("T1C", "t1ce"),
    ("FLAIR", "flair"),
    ("seg", "seg"),
    ("mask", "mask"),
    ("tumor", "tumor"),
    ("nontumor", "nontumor"),
    ("tissue", "tissue"),
    ("atropos", "atropos"),
    ("BE3_Grade", "BE3_Grade_RF_POS"),
    ("CD", "CD_RF_POS"),
    ("ERGarea", "ERGarea_RF_POS"),
    ("Ki67", "Ki67_RF_POS"),
    ("dm_T1_znorm", "dm_t1_znorm"),
    ("dm_T2_znorm", "dm_t2_znorm"),
    ("dm_T1C_znorm", "dm_t1ce_znorm"),
    ("dm_FLAIR_znorm", "dm_flair_znorm"),
    ("dm_roi_mask", "dm_roi_mask"),
];

/// A logical imaging channel: a manifest column name plus the filename
/// suffix used for that channel under the dataset layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub column: String,
    pub suffix: String,
}

impl ChannelSpec {
    pub fn new<C: Into<String>, S: Into<String>>(column: C, suffix: S) -> Self {
        Self {
            column: column.into(),
            suffix: suffix.into(),
        }
    }
}

/// The full channel table managed by the path synthesizer.
pub fn default_channels() -> Vec<ChannelSpec> {
    DEFAULT_CHANNEL_TABLE
        .iter()
        .map(|(column, suffix)| ChannelSpec::new(*column, *suffix))
        .collect()
}
