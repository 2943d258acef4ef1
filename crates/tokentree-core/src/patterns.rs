//! Built-in pattern lists.
//!
//! These are the static lists a host gets when it does not supply its own
//! [`PatternSets`](crate::PatternSets). All entries use gitignore syntax.

/// Exclusions applied in every mode, before any rule file or custom pattern.
pub const DEFAULT_PATTERNS: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    // Package managers
    "node_modules",
    "bower_components",
    "jspm_packages",
    ".pnpm-store",
    ".yarn/cache",
    // Python
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "*.egg-info",
    // JVM / .NET build state
    ".gradle",
    // Editors and OS litter
    ".idea",
    ".vs",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    "*.swp",
    "*.swo",
    // Caches
    ".cache",
    ".parcel-cache",
    ".next",
    ".nuxt",
    ".turbo",
];

/// Extra exclusions layered on in global mode, where no rule files are read.
///
/// In automatic mode files matching these survive but are flagged as
/// excluded by default.
pub const GLOBAL_PATTERNS: &[&str] = &[
    // Build outputs
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    ".nyc_output",
    "_site",
    // Logs and temp files
    "*.log",
    "logs",
    "tmp",
    "temp",
    "*.tmp",
    // Lock files
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Gemfile.lock",
    "composer.lock",
    // Generated or minified
    "*.min.js",
    "*.min.css",
    "*.map",
    // Secrets
    ".env",
    ".env.*",
];

/// Extensions whose content is never read.
pub const BINARY_EXTENSIONS: &[&str] = &[
    // Images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "tiff", "webp", "psd", "heic",
    // Audio / video
    "mp3", "wav", "ogg", "flac", "mp4", "mov", "avi", "mkv", "webm",
    // Archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar", "jar", "war",
    // Compiled
    "exe", "dll", "so", "dylib", "a", "lib", "o", "obj", "class", "pyc", "wasm",
    // Documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // Fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // Data
    "db", "sqlite", "sqlite3", "bin", "dat",
];
