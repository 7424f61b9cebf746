use license_ledger::application::ledger::LicenseLedger;
use license_ledger::domain::allocation::QuotaAllocation;
use license_ledger::domain::command::TransferRequest;
use license_ledger::domain::history::Description;
use license_ledger::domain::ids::{CompanyId, LicenseId, ProductType};
use license_ledger::error::LedgerError;

mod common;
use common::{admin, grant, key, ledger, renewal};

async fn allocation(ledger: &LicenseLedger, company: u32, product: &str) -> QuotaAllocation {
    let key = key(company, product);
    ledger
        .allocations()
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.key == key)
        .unwrap_or_else(|| QuotaAllocation::empty(key))
}

fn chest_transfer(source: u32, target: u32, units: u32) -> TransferRequest {
    TransferRequest {
        source: CompanyId(source),
        target: CompanyId(target),
        product_type: ProductType::from("Chest"),
        units,
    }
}

async fn granted_license(ledger: &LicenseLedger) -> LicenseId {
    ledger.issuer().issue(&admin(), key(1, "Chest"), 1).await.unwrap();
    ledger.subscriptions().grant(&admin(), grant(1, "Chest")).await.unwrap()
}

#[tokio::test]
async fn test_grant_scenario() {
    let ledger = ledger();
    let id = granted_license(&ledger).await;

    let license = ledger.subscriptions().license(id).await.unwrap();
    assert_eq!(license.activate_count, 1);

    let trail = ledger.history().list_by_license(id).await.unwrap();
    assert_eq!(trail.len(), 1);
    let entry = trail.iter().next().unwrap();
    assert_eq!(entry.description, Description::Generated);
    assert_eq!((entry.prev_cnt, entry.new_cnt), (0, 1));
}

#[tokio::test]
async fn test_renew_scenario_is_idempotent() {
    let ledger = ledger();
    let id = granted_license(&ledger).await;

    ledger.subscriptions().renew(&admin(), id, renewal()).await.unwrap();
    let again = ledger.subscriptions().renew(&admin(), id, renewal()).await;
    assert!(matches!(again, Err(LedgerError::NoOp(_))));

    let license = ledger.subscriptions().license(id).await.unwrap();
    assert_eq!(license.activate_count, 2);

    let updates: Vec<_> = ledger
        .history()
        .list_by_license(id)
        .await
        .unwrap()
        .into_vec()
        .into_iter()
        .filter(|e| e.description == Description::SubscriptionUpdated)
        .collect();
    assert_eq!(updates.len(), 1);
    let expiry = updates[0].expiry.as_ref().unwrap();
    assert_eq!(expiry.previous.to_rfc3339(), "2024-11-29T15:00:00+00:00");
    assert_eq!(expiry.new.to_rfc3339(), "2024-12-30T15:00:00+00:00");
}

#[tokio::test]
async fn test_withdraw_scenario_is_idempotent() {
    let ledger = ledger();
    let id = granted_license(&ledger).await;
    ledger.subscriptions().renew(&admin(), id, renewal()).await.unwrap();

    ledger.subscriptions().withdraw(&admin(), id).await.unwrap();
    let again = ledger.subscriptions().withdraw(&admin(), id).await;
    assert!(matches!(again, Err(LedgerError::AlreadyWithdrawn(_))));

    let license = ledger.subscriptions().license(id).await.unwrap();
    assert!(license.deleted);
    assert_eq!(license.activate_count, 1);

    let withdrawals = ledger
        .history()
        .list_by_license(id)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.description == Description::SubscriptionWithdrawn)
        .count();
    assert_eq!(withdrawals, 1);
    assert_eq!(allocation(&ledger, 1, "Chest").await.use_cnt, 0);
}

#[tokio::test]
async fn test_cancel_with_full_usage_is_rejected() {
    let ledger = ledger();
    let admin = admin();
    let issued = ledger.issuer().issue(&admin, key(1, "Chest"), 5).await.unwrap();
    for _ in 0..5 {
        ledger.subscriptions().grant(&admin, grant(1, "Chest")).await.unwrap();
    }

    let result = ledger.reverse(&admin, issued).await;
    assert!(matches!(result, Err(LedgerError::ValidationError(_))));

    let after = allocation(&ledger, 1, "Chest").await;
    assert_eq!((after.license_cnt, after.use_cnt), (5, 5));
}

#[tokio::test]
async fn test_transfer_conservation_and_reversibility() {
    let ledger = ledger();
    let admin = admin();
    ledger.issuer().issue(&admin, key(1, "Chest"), 8).await.unwrap();
    ledger.issuer().issue(&admin, key(2, "Chest"), 3).await.unwrap();
    ledger.subscriptions().grant(&admin, grant(2, "Chest")).await.unwrap();

    let a_before = allocation(&ledger, 1, "Chest").await;
    let b_before = allocation(&ledger, 2, "Chest").await;

    let receipt = ledger.transfers().transfer(&admin, chest_transfer(1, 2, 5)).await.unwrap();
    assert_eq!(
        receipt.source.license_cnt + receipt.target.license_cnt,
        a_before.license_cnt + b_before.license_cnt
    );

    ledger.reverse(&admin, receipt.entry).await.unwrap();
    assert_eq!(allocation(&ledger, 1, "Chest").await, a_before);
    assert_eq!(allocation(&ledger, 2, "Chest").await, b_before);

    let again = ledger.reverse(&admin, receipt.entry).await;
    assert!(matches!(again, Err(LedgerError::AlreadyCanceled(_))));
}

#[tokio::test]
async fn test_transfer_beyond_headroom_is_rejected() {
    let ledger = ledger();
    let admin = admin();
    ledger.issuer().issue(&admin, key(1, "Chest"), 4).await.unwrap();
    ledger.subscriptions().grant(&admin, grant(1, "Chest")).await.unwrap();

    let result = ledger.transfers().transfer(&admin, chest_transfer(1, 2, 4)).await;
    assert!(matches!(result, Err(LedgerError::ValidationError(_))));

    // The full headroom is still transferable.
    ledger.transfers().transfer(&admin, chest_transfer(1, 2, 3)).await.unwrap();
    let source = allocation(&ledger, 1, "Chest").await;
    assert_eq!((source.license_cnt, source.use_cnt), (1, 1));
}

#[tokio::test]
async fn test_products_are_accounted_separately() {
    let ledger = ledger();
    let admin = admin();
    ledger.issuer().issue(&admin, key(1, "Chest"), 1).await.unwrap();

    let result = ledger.subscriptions().grant(&admin, grant(1, "Bone Age")).await;
    assert!(matches!(result, Err(LedgerError::ValidationError(_))));
    ledger.subscriptions().grant(&admin, grant(1, "Chest")).await.unwrap();

    let trail = ledger.history().list_by_allocation(&key(1, "Bone Age")).await.unwrap();
    assert!(trail.is_empty());
}
