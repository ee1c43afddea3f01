mod progress;
mod styling;
mod tables;

pub use progress::{waiting, StageProgress};
pub use styling::{bright_green, bright_red, dim, magenta_bold};
pub use tables::pipelines_table;

/// Prints the `CIRelay` banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🚦 CIRelay"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Pipeline status and promotion orchestration")
    );
}
