use clap::ValueEnum;

/// What to do when the destination file already exists.
#[derive(ValueEnum, Clone, Debug)]
pub enum ExistingMode {
    /// Leave the existing file alone and exit.
    Skip,
    /// Replace the existing file.
    Overwrite,
    /// Pick a fresh `name_<n>.ext` next to it.
    Unique,
}
