//! Calendar, lag and rolling features.

pub mod builder;
pub mod descriptor;

pub use builder::{build_features, BuildReport, EmptyCause, FeatureBuild, FeatureRow};
pub use descriptor::{
    CalendarField, FeatureDescriptor, FeatureKind, FeatureSet, FeatureSpec, HourlyLookup,
    ModelInput,
};
