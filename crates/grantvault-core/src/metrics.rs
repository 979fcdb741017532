//! Token issuance counters.
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the
//! embedding process installs a recorder.

use metrics::counter;

use crate::grant::GrantKind;
use crate::token::TokenKind;

/// Metric names.
pub mod names {
    pub const TOKENS_ISSUED_TOTAL: &str = "grantvault_tokens_issued_total";
}

/// Counts one freshly minted token. Reused tokens are not counted.
pub fn record_token_issued(kind: TokenKind, grant_kind: GrantKind, format: &'static str) {
    counter!(
        names::TOKENS_ISSUED_TOTAL,
        "kind" => kind.as_str(),
        "grant_type" => grant_kind.as_str(),
        "format" => format
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    use super::names;
    use crate::config::GrantConfig;
    use crate::factory::GrantFactory;
    use crate::grant::GrantBackend;
    use crate::services::GrantServices;
    use crate::types::{Client, User};

    fn sample_value(rendered: &str, kind: &str) -> Option<u64> {
        rendered
            .lines()
            .filter(|line| line.starts_with(names::TOKENS_ISSUED_TOTAL))
            .find(|line| line.contains(&format!("kind=\"{kind}\"")))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn test_minted_tokens_are_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let factory = GrantFactory::new(
                    GrantServices::new(GrantConfig::default()),
                    GrantBackend::InMemory,
                );
                let grant = factory
                    .authorization_code_grant(
                        User::new("user-1", "alice"),
                        Client::new("app", "App"),
                        None,
                    )
                    .await
                    .unwrap();
                grant.mint_access_token(None).await.unwrap();
                grant.mint_access_token(None).await.unwrap();
                grant.mint_refresh_token().await.unwrap();
                grant.mint_refresh_token().await.unwrap();
                // returns the existing code, not counted again
                grant.mint_authorization_code().await.unwrap();
            });
        });

        let rendered = handle.render();
        assert_eq!(sample_value(&rendered, "access_token"), Some(2));
        assert_eq!(sample_value(&rendered, "refresh_token"), Some(2));
        assert_eq!(sample_value(&rendered, "authorization_code"), Some(1));
        assert!(rendered.contains("grant_type=\"authorization_code\""));
        assert!(rendered.contains("format=\"opaque\""));
    }
}
