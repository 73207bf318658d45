use vergen_gitcl::{Emitter, GitclBuilder};

// Git metadata for `bifrost::version_string()`. Builds outside a git
// checkout fall back to "unknown" at compile time.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gitcl = GitclBuilder::default()
        .branch(true)
        .sha(false)
        .dirty(false)
        .build()?;
    Emitter::default().add_instructions(&gitcl)?.emit()?;
    Ok(())
}
