use rand::Rng;
use snafu::Snafu;
use std::fmt;
use std::str::FromStr;

/// Tolerance on the ratio-sum check so configurations like (0.8, 0.1, 0.1),
/// whose f64 sum lands just above 1.0, validate.
const RATIO_SUM_TOLERANCE: f64 = 1e-9;

/// Categories whose subjects are eligible for the randomized training pool.
pub const TRAIN_CATEGORIES: &[&str] = &["HGG", "LGG"];

/// Category marking subjects pre-held-out for validation.
pub const VAL_CATEGORY: &str = "VAL";

/// Category marking subjects pre-held-out for testing.
pub const TEST_CATEGORY: &str = "TEST";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PartitionError {
    #[snafu(display(
        "Invalid ratio configuration: train={} val={} test={} (each ratio must be in [0,1] and the sum must not exceed 1)",
        train,
        val,
        test
    ))]
    InvalidRatioConfiguration { train: f64, val: f64, test: f64 },

    #[snafu(display(
        "Subject {} has category {:?}, expected {:?}",
        identifier,
        category,
        expected
    ))]
    UnknownCategory {
        identifier: String,
        category: String,
        expected: String,
    },

    #[snafu(display(
        "Unknown category mode {:?} (expected fixed, pool, or single:<name>)",
        mode
    ))]
    InvalidMode { mode: String },
}

/// One of the disjoint subject groups a partition run assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Train,
    Val,
    Test,
    Excluded,
}

impl Partition {
    /// Partitions that receive output file lists.
    pub const OUTPUT: [Partition; 3] = [Partition::Train, Partition::Val, Partition::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
            Partition::Excluded => "excluded",
        }
    }

    /// Whether the downstream network emits predictions for this partition,
    /// and hence whether a prediction-filename list is kept for it.
    pub fn wants_predictions(&self) -> bool {
        matches!(self, Partition::Val | Partition::Test)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Train/val/test proportions, validated once at construction. The sum may
/// be below 1; the residual probability mass is an intentional drop region
/// and is never renormalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRatios {
    train: f64,
    val: f64,
    test: f64,
}

impl SplitRatios {
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self, PartitionError> {
        let in_bounds = |r: f64| (0.0..=1.0).contains(&r);
        let valid = in_bounds(train)
            && in_bounds(val)
            && in_bounds(test)
            && train + val + test <= 1.0 + RATIO_SUM_TOLERANCE;
        if !valid {
            return InvalidRatioConfigurationSnafu { train, val, test }.fail();
        }
        Ok(Self { train, val, test })
    }

    pub fn train(&self) -> f64 {
        self.train
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn test(&self) -> f64 {
        self.test
    }

    /// Map a uniform draw in [0,1) onto a partition band.
    fn classify(&self, r: f64) -> Partition {
        if r < self.train {
            Partition::Train
        } else if r < self.train + self.val {
            Partition::Val
        } else if r < self.train + self.val + self.test {
            Partition::Test
        } else {
            Partition::Excluded
        }
    }
}

/// How subjects are selected for each partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryMode {
    /// Category labels in the manifest directly determine the partition;
    /// the ratios are ignored and no randomness is consulted.
    Fixed,
    /// All training-eligible categories form one pool for the randomized
    /// split; other categories are excluded.
    Pool,
    /// Randomized split restricted to exactly one named category. A row with
    /// any other category is a manifest/configuration mismatch.
    Single(String),
}

impl FromStr for CategoryMode {
    type Err = PartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(CategoryMode::Fixed),
            "pool" => Ok(CategoryMode::Pool),
            _ => match s.strip_prefix("single:") {
                Some(name) if !name.is_empty() => Ok(CategoryMode::Single(name.to_string())),
                _ => InvalidModeSnafu { mode: s }.fail(),
            },
        }
    }
}

impl fmt::Display for CategoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryMode::Fixed => write!(f, "fixed"),
            CategoryMode::Pool => write!(f, "pool"),
            CategoryMode::Single(name) => write!(f, "single:{}", name),
        }
    }
}

/// Assigns each subject to exactly one partition.
///
/// The configuration is fixed for the whole run; each subject's assignment
/// is an independent, stateless transition. Randomness is injected through
/// the `Rng` passed to [`PartitionPolicy::assign`], so a seeded generator
/// makes an entire run reproducible.
#[derive(Debug, Clone)]
pub struct PartitionPolicy {
    mode: CategoryMode,
    ratios: SplitRatios,
}

impl PartitionPolicy {
    pub fn new(mode: CategoryMode, ratios: SplitRatios) -> Self {
        Self { mode, ratios }
    }

    pub fn mode(&self) -> &CategoryMode {
        &self.mode
    }

    pub fn ratios(&self) -> SplitRatios {
        self.ratios
    }

    /// Assign one subject. Fixed mode consumes no random draw.
    pub fn assign<R: Rng>(
        &self,
        identifier: &str,
        category: &str,
        rng: &mut R,
    ) -> Result<Partition, PartitionError> {
        match &self.mode {
            CategoryMode::Fixed => Ok(Self::fixed_lookup(category)),
            CategoryMode::Pool => {
                if TRAIN_CATEGORIES.contains(&category) {
                    Ok(self.ratios.classify(rng.gen::<f64>()))
                } else {
                    Ok(Partition::Excluded)
                }
            }
            CategoryMode::Single(name) => {
                if category == name {
                    Ok(self.ratios.classify(rng.gen::<f64>()))
                } else {
                    UnknownCategorySnafu {
                        identifier,
                        category,
                        expected: name.clone(),
                    }
                    .fail()
                }
            }
        }
    }

    fn fixed_lookup(category: &str) -> Partition {
        if TRAIN_CATEGORIES.contains(&category) {
            Partition::Train
        } else if category == VAL_CATEGORY {
            Partition::Val
        } else if category == TEST_CATEGORY {
            Partition::Test
        } else {
            Partition::Excluded
        }
    }
}
