//! Verification rounds over the pending `verify-args` registry.

use deploy_cache::{registry, Cache};
use deploy_core::{Address, DeployError, Result, Verifier};
use tracing::{info, warn};

/// A submission that failed; its entry stays queued.
#[derive(Debug, Clone)]
pub struct VerificationFailure {
    pub address: Address,
    /// Always [`DeployError::Verification`].
    pub error: DeployError,
}

/// Outcome of one verification round.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Addresses verified and removed from the queue.
    pub verified: Vec<Address>,

    pub failed: Vec<VerificationFailure>,
}

impl VerifyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Submit every queued entry. Only successful submissions are dequeued.
pub async fn verify_pending(cache: &Cache, verifier: &dyn Verifier) -> Result<VerifyReport> {
    let pending = registry::get_verify_args(cache).await?;
    let mut report = VerifyReport::default();

    for (address, args) in pending {
        match verifier.submit_verification(&args).await {
            Ok(()) => {
                registry::delete_verify_args(cache, &address).await?;
                info!(%address, contract = %args.contract, "✅ Verified contract");
                report.verified.push(address);
            }
            Err(err) => {
                let error = DeployError::Verification {
                    address: address.to_string(),
                    message: err.to_string(),
                };
                warn!(contract = %args.contract, %error, "Keeping verification entry");
                report.failed.push(VerificationFailure { address, error });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_core::testing::MockChain;
    use deploy_core::VerifyArgs;
    use serde_json::json;

    fn args(address: &Address, contract: &str) -> VerifyArgs {
        VerifyArgs {
            address: address.clone(),
            contract: contract.to_string(),
            source_path: format!("test/{}.sol", contract),
            constructor_arguments: vec![json!("spot")],
        }
    }

    #[tokio::test]
    async fn test_failed_entries_are_retained() {
        let cache = Cache::in_memory("test-network", "test-deployment");
        let chain = MockChain::new();
        let good = Address::from("0x01");
        let bad = Address::from("0x02");
        registry::put_verify_args(&cache, &good, &args(&good, "Dog")).await.unwrap();
        registry::put_verify_args(&cache, &bad, &args(&bad, "Cat")).await.unwrap();
        chain.fail_verification(&bad).await;

        let report = verify_pending(&cache, &chain).await.unwrap();

        assert_eq!(report.verified, vec![good]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].address, bad);
        assert_eq!(report.failed[0].error.address(), Some(bad.as_str()));
        assert!(report.failed[0].error.to_string().contains("bytecode mismatch"));
        assert!(report.failed[0].error.is_retryable());
        assert!(!report.is_complete());

        let remaining = registry::get_verify_args(&cache).await.unwrap();
        assert_eq!(remaining.keys().collect::<Vec<_>>(), vec![&bad]);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let cache = Cache::in_memory("test-network", "test-deployment");
        let report = verify_pending(&cache, &MockChain::new()).await.unwrap();
        assert!(report.verified.is_empty());
        assert!(report.is_complete());
    }
}
