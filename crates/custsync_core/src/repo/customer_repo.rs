//! Customer repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide get/create/update/delete/list-by-ids over the `customers` table.
//! - Track which rows carry a local edit the remote side has not confirmed
//!   (`pending_sync`).
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths call `CustomerFields::validate()` before SQL mutations.
//! - Duplicate emails surface as `CustomerValidationError::DuplicateEmail`,
//!   never as a raw constraint failure.
//! - Repositories never open or commit transactions; callers pass a
//!   connection or an open transaction and own the commit.

use crate::db::DbError;
use crate::model::customer::{Customer, CustomerFields, CustomerValidationError, LocalId};
use crate::repo::identity_repo::IdentityConflict;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CUSTOMER_SELECT_SQL: &str = "SELECT id, name, email FROM customers";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by customer and identity persistence.
#[derive(Debug)]
pub enum RepoError {
    Validation(CustomerValidationError),
    Db(DbError),
    NotFound(LocalId),
    Conflict(IdentityConflict),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "customer not found: {id}"),
            Self::Conflict(conflict) => write!(f, "{conflict}"),
            Self::InvalidData(message) => write!(f, "invalid persisted customer data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Conflict(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<CustomerValidationError> for RepoError {
    fn from(value: CustomerValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for local customer records.
pub trait CustomerRepository {
    fn create_customer(&self, fields: &CustomerFields) -> RepoResult<Customer>;
    fn update_customer(&self, id: LocalId, fields: &CustomerFields) -> RepoResult<Customer>;
    fn delete_customer(&self, id: LocalId) -> RepoResult<Customer>;
    fn get_customer(&self, id: LocalId) -> RepoResult<Option<Customer>>;
    /// Returns the customers among `ids` that exist, ordered by id.
    fn list_customers_by_ids(&self, ids: &[LocalId]) -> RepoResult<Vec<Customer>>;
    /// Customers without an identity entry, ordered by id.
    fn list_unmapped_customers(&self) -> RepoResult<Vec<Customer>>;
    fn set_pending_sync(&self, id: LocalId, pending: bool) -> RepoResult<()>;
    /// Clears the marker only while the row still holds exactly `fields`;
    /// returns whether it was cleared.
    fn clear_pending_sync(&self, id: LocalId, fields: &CustomerFields) -> RepoResult<bool>;
    fn list_pending_sync_ids(&self) -> RepoResult<Vec<LocalId>>;
}

/// SQLite-backed customer repository.
///
/// Accepts a plain connection or a `Transaction` (via deref).
pub struct SqliteCustomerRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCustomerRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn ensure_email_free(&self, email: &str, owner: Option<LocalId>) -> RepoResult<()> {
        let taken: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM customers
                WHERE email = ?1
                  AND (?2 IS NULL OR id <> ?2)
            );",
            params![email, owner],
            |row| row.get(0),
        )?;
        if taken == 1 {
            return Err(CustomerValidationError::DuplicateEmail(email.to_string()).into());
        }
        Ok(())
    }
}

impl CustomerRepository for SqliteCustomerRepository<'_> {
    fn create_customer(&self, fields: &CustomerFields) -> RepoResult<Customer> {
        fields.validate()?;
        self.ensure_email_free(&fields.email, None)?;

        self.conn
            .execute(
                "INSERT INTO customers (name, email) VALUES (?1, ?2);",
                params![fields.name.as_str(), fields.email.as_str()],
            )
            .map_err(|err| map_constraint(err, &fields.email))?;

        Ok(Customer {
            local_id: self.conn.last_insert_rowid(),
            name: fields.name.clone(),
            email: fields.email.clone(),
        })
    }

    fn update_customer(&self, id: LocalId, fields: &CustomerFields) -> RepoResult<Customer> {
        fields.validate()?;
        self.ensure_email_free(&fields.email, Some(id))?;

        let changed = self
            .conn
            .execute(
                "UPDATE customers
                 SET
                    name = ?1,
                    email = ?2,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?3;",
                params![fields.name.as_str(), fields.email.as_str(), id],
            )
            .map_err(|err| map_constraint(err, &fields.email))?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(Customer {
            local_id: id,
            name: fields.name.clone(),
            email: fields.email.clone(),
        })
    }

    fn delete_customer(&self, id: LocalId) -> RepoResult<Customer> {
        let existing = self.get_customer(id)?.ok_or(RepoError::NotFound(id))?;
        self.conn
            .execute("DELETE FROM customers WHERE id = ?1;", [id])?;
        Ok(existing)
    }

    fn get_customer(&self, id: LocalId) -> RepoResult<Option<Customer>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CUSTOMER_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_customer_row(row)?));
        }
        Ok(None)
    }

    fn list_customers_by_ids(&self, ids: &[LocalId]) -> RepoResult<Vec<Customer>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{CUSTOMER_SELECT_SQL} WHERE id IN ({placeholders}) ORDER BY id ASC;");
        let bind_values = ids.iter().map(|id| Value::Integer(*id));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut customers = Vec::with_capacity(ids.len());
        while let Some(row) = rows.next()? {
            customers.push(parse_customer_row(row)?);
        }
        Ok(customers)
    }

    fn list_unmapped_customers(&self) -> RepoResult<Vec<Customer>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id AS id, c.name AS name, c.email AS email
             FROM customers c
             LEFT JOIN identity_map m ON m.local_id = c.id
             WHERE m.local_id IS NULL
             ORDER BY c.id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut customers = Vec::new();
        while let Some(row) = rows.next()? {
            customers.push(parse_customer_row(row)?);
        }
        Ok(customers)
    }

    fn set_pending_sync(&self, id: LocalId, pending: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE customers SET pending_sync = ?1 WHERE id = ?2;",
            params![pending, id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }

    fn clear_pending_sync(&self, id: LocalId, fields: &CustomerFields) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE customers
             SET pending_sync = 0
             WHERE id = ?1
               AND name = ?2
               AND email = ?3
               AND pending_sync = 1;",
            params![id, fields.name.as_str(), fields.email.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn list_pending_sync_ids(&self) -> RepoResult<Vec<LocalId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM customers WHERE pending_sync = 1 ORDER BY id ASC;")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }
}

fn parse_customer_row(row: &Row<'_>) -> RepoResult<Customer> {
    let customer = Customer {
        local_id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
    };
    if customer.name.trim().is_empty() {
        return Err(RepoError::InvalidData(format!(
            "empty name in customers.name for id {}",
            customer.local_id
        )));
    }
    Ok(customer)
}

fn map_constraint(err: rusqlite::Error, email: &str) -> RepoError {
    match err {
        rusqlite::Error::SqliteFailure(ref inner, _)
            if inner.code == ErrorCode::ConstraintViolation =>
        {
            RepoError::Validation(CustomerValidationError::DuplicateEmail(email.to_string()))
        }
        other => other.into(),
    }
}
