use tela_resource::ResolveError;

/// Evaluate a single resource requirement statement. Exit code 0 means the
/// resource fulfils the requirement.
pub fn run(type_name: &str, res: &str, req: &str) -> anyhow::Result<i32> {
    match tela_resource::res_eval(type_name, req, res) {
        Ok(true) => Ok(0),
        Ok(false) => Ok(1),
        Err(ResolveError::UnknownType(name)) => {
            eprintln!("Unknown resource type '{name}'");
            eprintln!("Known types:");
            for known in tela_resource::known_types() {
                if !known.is_empty() {
                    eprintln!("  - {known}");
                }
            }
            Ok(1)
        }
        Err(err) => Err(err.into()),
    }
}
