use std::path::PathBuf;

/// Reserved location that opens an ephemeral, in-memory store.
pub const MEMORY_LOCATION: &str = ":mem:";

/// Default size of the chunks handed to a streaming consumer (4 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default number of extra probe/fill rounds before a buffered fetch gives up.
pub const DEFAULT_FETCH_RETRIES: u32 = 3;

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Private in-memory database; contents vanish on close.
    Memory,
    /// Database file on the local filesystem.
    File(PathBuf),
}

impl Location {
    /// Interpret a backend address. `:mem:` is the in-memory sentinel;
    /// anything else is a path. Returns None for an empty address.
    pub fn parse(location: &str) -> Option<Self> {
        match location {
            "" => None,
            MEMORY_LOCATION => Some(Location::Memory),
            path => Some(Location::File(PathBuf::from(path))),
        }
    }
}

/// Options for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend address, see [`Location::parse`].
    pub location: String,

    /// Open without write access. Mutations fail with `READ_ONLY` and a
    /// missing database file is not created.
    pub read_only: bool,

    /// Upper bound on the size of each streamed chunk.
    pub chunk_size: usize,

    /// Extra rounds a buffered fetch may take when the record changes
    /// length between the probe and the fill.
    pub fetch_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: MEMORY_LOCATION.to_string(),
            read_only: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_retries: DEFAULT_FETCH_RETRIES,
        }
    }
}

impl StoreConfig {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Default::default()
        }
    }

    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--db=PATH` (or `--db=:mem:`)
    /// - `--read-only`
    /// - `--chunk-size=BYTES`
    /// - `--fetch-retries=N`
    ///
    /// Unparseable numbers leave the default in place.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = StoreConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--db=") {
                config.location = val.to_string();
            } else if arg == "--read-only" {
                config.read_only = true;
            } else if let Some(val) = arg.strip_prefix("--chunk-size=") {
                if let Ok(n) = val.parse() {
                    config.chunk_size = n;
                }
            } else if let Some(val) = arg.strip_prefix("--fetch-retries=") {
                if let Ok(n) = val.parse() {
                    config.fetch_retries = n;
                }
            }
        }

        config
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn fetch_retries(mut self, fetch_retries: u32) -> Self {
        self.fetch_retries = fetch_retries;
        self
    }

    pub fn resolve_location(&self) -> Option<Location> {
        Location::parse(&self.location)
    }

    /// Chunk size clamped so every chunk length fits a C `unsigned int`.
    pub fn effective_chunk_size(&self) -> usize {
        let max = usize::try_from(u32::MAX).unwrap_or(usize::MAX);
        self.chunk_size.clamp(1, max)
    }
}
