//! Static parser for Windows Portable Executable images.
//!
//! ```no_run
//! use pescope::ParsedImage;
//!
//! let image = ParsedImage::open("sample.dll");
//! if image.is_initialized() {
//!     for section in image.sections() {
//!         println!("{}", section.name());
//!     }
//! }
//! ```

/// Parser options
pub mod config;
pub mod error;
/// Bounded file access
pub mod io;
pub mod logging;
/// PE headers, sections and data directories
pub mod pe;

pub use config::ParseOptions;
pub use error::{PeError, Result};
pub use io::{IOLimits, ImageReader};
pub use pe::directories::{DirectoryParser, Directories, ParseContext};
pub use pe::sections::SectionTable;
pub use pe::ParsedImage;
