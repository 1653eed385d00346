//! Account queries. Accounts are created by the provisioning flow and only
//! ever transition status here.

use courant_common::now_ms;

use crate::{
    error::{Result, StoreError},
    store::{Store, account_from_row, new_id},
    types::{Account, AccountStatus},
};

/// Fields the provisioning flow supplies when registering an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: String,
    pub business_id: String,
    pub phone_id: Option<String>,
    pub phone: String,
    pub display_name: String,
    pub access_token: String,
    pub verify_token: String,
    pub status: AccountStatus,
}

impl Store {
    pub async fn insert_account(&self, new: NewAccount) -> Result<Account> {
        let id = new_id();
        let created_at = now_ms();
        sqlx::query(
            "INSERT INTO accounts
             (id, user_id, business_id, phone_id, phone, display_name,
              access_token, verify_token, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.business_id)
        .bind(&new.phone_id)
        .bind(&new.phone)
        .bind(&new.display_name)
        .bind(&new.access_token)
        .bind(&new.verify_token)
        .bind(new.status.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        self.account_by_id(&id).await?.ok_or(StoreError::NotFound {
            what: "account",
        })
    }

    pub async fn account_by_id(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    /// Resolve an account by the provider's external phone-number id.
    pub async fn account_by_phone_id(&self, phone_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE phone_id = ?")
            .bind(phone_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    pub async fn accounts_for_user(&self, user_id: &str) -> Result<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE user_id = ? ORDER BY created_at")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    /// Whether any configured account uses this webhook verify token.
    pub async fn verify_token_known(&self, token: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM accounts WHERE verify_token = ? LIMIT 1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn update_account_status(&self, id: &str, status: AccountStatus) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { what: "account" });
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn make_store() -> Store {
        Store::connect("sqlite::memory:").await.unwrap()
    }

    pub(crate) fn make_account(phone_id: &str) -> NewAccount {
        NewAccount {
            user_id: "user-1".into(),
            business_id: "biz-1".into(),
            phone_id: Some(phone_id.into()),
            phone: "+15550100001".into(),
            display_name: "Test Line".into(),
            access_token: "token-secret".into(),
            verify_token: "verify-secret".into(),
            status: AccountStatus::Active,
        }
    }

    #[tokio::test]
    async fn insert_and_resolve_by_phone_id() {
        let store = make_store().await;
        let account = store.insert_account(make_account("ph-1")).await.unwrap();

        let found = store.account_by_phone_id("ph-1").await.unwrap().unwrap();
        assert_eq!(found.id, account.id);
        assert_eq!(found.status, AccountStatus::Active);

        assert!(store.account_by_phone_id("ph-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_transition() {
        let store = make_store().await;
        let account = store.insert_account(make_account("ph-1")).await.unwrap();

        store
            .update_account_status(&account.id, AccountStatus::NameDeclined)
            .await
            .unwrap();
        let found = store.account_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(found.status, AccountStatus::NameDeclined);
        assert!(!found.status.is_eligible());
    }

    #[tokio::test]
    async fn update_missing_account_errors() {
        let store = make_store().await;
        let err = store
            .update_account_status("nope", AccountStatus::Active)
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn verify_token_lookup() {
        let store = make_store().await;
        store.insert_account(make_account("ph-1")).await.unwrap();
        assert!(store.verify_token_known("verify-secret").await.unwrap());
        assert!(!store.verify_token_known("wrong").await.unwrap());
    }
}
