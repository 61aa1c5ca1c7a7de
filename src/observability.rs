//! Inicialização do logging estruturado via `tracing`.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Escolhe a diretiva de filtro: `RUST_LOG` vence, depois `--verbose`,
/// depois o valor do arquivo de configuração.
pub fn filter_directive(env: Option<String>, verbose: bool, configured: &str) -> String {
    match env.filter(|v| !v.trim().is_empty()) {
        Some(directive) => directive,
        None if verbose => "debug".to_string(),
        None => configured.to_string(),
    }
}

/// Instala o subscriber global. Chamadas repetidas são ignoradas.
pub fn init(configured: &str, verbose: bool) {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), verbose, configured);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_takes_precedence() {
        let directive = filter_directive(Some("phasesync=trace".into()), true, "warn");
        assert_eq!(directive, "phasesync=trace");
    }

    #[test]
    fn verbose_beats_config() {
        assert_eq!(filter_directive(None, true, "warn"), "debug");
        assert_eq!(filter_directive(Some(" ".into()), true, "warn"), "debug");
    }

    #[test]
    fn config_is_the_fallback() {
        assert_eq!(filter_directive(None, false, "warn"), "warn");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init("info", false);
        init("debug", true);
    }
}
