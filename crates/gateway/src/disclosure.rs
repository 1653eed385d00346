//! Progressive disclosure: omitted parameters become guided choice lists
//! instead of hard failures.
//!
//! Every tool takes a sender phone number (`from`) instead of an internal
//! account id, and every recipient-targeting tool takes a recipient phone
//! (`phone`) instead of a conversation id. These two helpers are the only
//! resolution paths, so every tool behaves identically.

use {anyhow::Result, serde::Serialize};

use {
    courant_common::{display_phone, normalize_external_id},
    courant_store::{Account, Contact, Store},
};

/// Returned in place of a result when a required parameter is omitted or
/// does not resolve: the caller picks from `options` and retries.
#[derive(Debug, Clone, Serialize)]
pub struct Disclosure {
    pub parameter: &'static str,
    pub message: String,
    pub options: Vec<DisclosureOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisclosureOption {
    pub value: String,
    pub label: String,
}

/// Either the resolved entity or the disclosure to send back.
pub enum Resolved<T> {
    Found(T),
    Disclose(Disclosure),
}

/// Resolve the sending account from a phone number, scoped to the keyholder's
/// user. Omitted or unmatched numbers disclose the available accounts.
pub async fn resolve_sender(
    store: &Store,
    user_id: &str,
    from: Option<&str>,
) -> Result<Resolved<Account>> {
    let accounts = store.accounts_for_user(user_id).await?;

    let Some(from) = from else {
        return Ok(Resolved::Disclose(Disclosure {
            parameter: "from",
            message: "Specify the sender phone number via 'from'.".into(),
            options: account_options(&accounts),
        }));
    };

    let wanted = display_phone(&normalize_external_id(from));
    match accounts.into_iter().find(|a| a.phone == wanted) {
        Some(account) => Ok(Resolved::Found(account)),
        None => {
            let accounts = store.accounts_for_user(user_id).await?;
            Ok(Resolved::Disclose(Disclosure {
                parameter: "from",
                message: format!("No account with phone number {wanted}."),
                options: account_options(&accounts),
            }))
        },
    }
}

/// Resolve the recipient contact from a phone number. Omitted numbers
/// disclose the account's recent contacts. With `create_if_missing`, an
/// unknown number lazily becomes a new contact (first explicit send);
/// otherwise it discloses.
pub async fn resolve_recipient(
    store: &Store,
    account: &Account,
    phone: Option<&str>,
    create_if_missing: bool,
) -> Result<Resolved<Contact>> {
    let Some(phone) = phone else {
        return Ok(Resolved::Disclose(Disclosure {
            parameter: "phone",
            message: "Specify the recipient phone number via 'phone'.".into(),
            options: contact_options(store, &account.id).await?,
        }));
    };

    let external_id = normalize_external_id(phone);
    if let Some(contact) = store
        .contact_by_external_id(&account.id, &external_id)
        .await?
    {
        return Ok(Resolved::Found(contact));
    }

    if create_if_missing {
        let contact = store
            .upsert_contact(&account.id, &external_id, &display_phone(&external_id), None)
            .await?;
        return Ok(Resolved::Found(contact));
    }

    Ok(Resolved::Disclose(Disclosure {
        parameter: "phone",
        message: format!(
            "No conversation with {} yet.",
            display_phone(&external_id)
        ),
        options: contact_options(store, &account.id).await?,
    }))
}

fn account_options(accounts: &[Account]) -> Vec<DisclosureOption> {
    accounts
        .iter()
        .map(|a| DisclosureOption {
            value: a.phone.clone(),
            label: a.display_name.clone(),
        })
        .collect()
}

async fn contact_options(store: &Store, account_id: &str) -> Result<Vec<DisclosureOption>> {
    let contacts = store.recent_contacts(account_id, 20).await?;
    Ok(contacts
        .iter()
        .map(|c| DisclosureOption {
            value: c.phone.clone(),
            label: c
                .display_name
                .clone()
                .unwrap_or_else(|| c.phone.clone()),
        })
        .collect())
}
