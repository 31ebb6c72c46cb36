use anyhow::Result;
use std::path::Path;

pub(crate) const DEFAULT_CONFIG: &str = r#"# Quarry Configuration

[agent]
max_turns = 5
default_search_limit = 5
initial_results = 5
initial_context_chars = 8000
history_messages = 5
temperature = 0.3
max_tokens = 4096
model = ""

# Static ranking multipliers, read once at start
[scoring.extensions]
md = 1.2
py = 1.1

[scoring.path_includes]
test = 0.8
docs = 1.1

[retrieval]
db_path = "~/.quarry/index.db"

[[retrieval.spaces]]
name = "general"
kind = "general"
model = "text-embedding-3-small"
dimensions = 1536

[[retrieval.spaces]]
name = "code"
kind = "code"
model = "text-embedding-3-large"
dimensions = 3072

# Ids under category/name/ link back to the repository
# [[retrieval.repositories]]
# category = "astro"
# name = "lens"
# url = "https://github.com/astro/lens"
# branch = "main"

[thread_cache]
max_threads = 50
max_docs = 3
ttl_secs = 3600

[storage]
state_path = "~/.quarry/state.redb"

[llm]
provider = "openai"
model = ""

[gateway]
daily_limit = 100
api_token = ""
allowed_origins = []
channel_capacity = 32
"#;

/// Initialize a new config file
pub fn run_init(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Config already exists at {:?}", path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    println!("Created config at {:?}", path);
    Ok(())
}
