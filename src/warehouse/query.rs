//! SQL builders.
//!
//! Table identifiers cannot be bound as parameters, so they are validated
//! against `[A-Za-z_][A-Za-z0-9_]*` before being interpolated. Every value
//! coming from a request is passed as a named parameter.

use super::{Query, WarehouseError, WarehouseResult};

/// Columns never returned from the `user` table
const USER_HIDDEN_COLUMNS: &str = "password_hash";

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn validate_identifier(name: &str) -> WarehouseResult<&str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(WarehouseError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

fn select_list(table: &str) -> String {
    if table == "user" {
        format!("* EXCEPT ({})", USER_HIDDEN_COLUMNS)
    } else {
        "*".to_string()
    }
}

/// Pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u64,
}

/// Paginated `SELECT` over one table of the schema
#[derive(Debug, Clone)]
pub struct TableQuery {
    schema: String,
    table: String,
}

impl TableQuery {
    pub fn new(schema: &str, table: &str) -> WarehouseResult<Self> {
        Ok(Self {
            schema: validate_identifier(schema)?.to_string(),
            table: validate_identifier(table)?.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// One row more than the page is fetched so the caller can tell whether more exist
    pub fn page(&self, page: Page) -> Query {
        Query::new(format!(
            "SELECT {} FROM `{}.{}` LIMIT {} OFFSET {}",
            select_list(&self.table),
            self.schema,
            self.table,
            u64::from(page.limit) + 1,
            page.offset
        ))
    }
}

/// Single-entity lookups keyed by `unique_id` or `email`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLookup {
    Salary,
    Submission,
    AdditionalPosition,
    ListTech,
    DataAmount,
    UserByEmail,
}

impl EntityLookup {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Salary => "salary",
            Self::Submission => "submission",
            Self::AdditionalPosition => "additional_position",
            Self::ListTech => "list_tech",
            Self::DataAmount => "data_amount",
            Self::UserByEmail => "user",
        }
    }

    pub fn key_column(&self) -> &'static str {
        match self {
            Self::UserByEmail => "email",
            _ => "unique_id",
        }
    }

    fn columns(&self) -> String {
        match self {
            Self::Salary => "salary_net, salary_gross".to_string(),
            Self::Submission => {
                "position_group, position, seniority, tech, contract_type, country_salary".to_string()
            }
            Self::AdditionalPosition => "additional_position_group, additional_position".to_string(),
            Self::ListTech => "tech, amount".to_string(),
            Self::DataAmount => "amount".to_string(),
            Self::UserByEmail => select_list("user"),
        }
    }

    /// Lookups other than `list_tech` return at most one row
    pub fn is_single_row(&self) -> bool {
        !matches!(self, Self::ListTech)
    }

    pub fn query(&self, schema: &str, key: &str) -> WarehouseResult<Query> {
        let schema = validate_identifier(schema)?;
        let column = self.key_column();

        let tail = if self.is_single_row() {
            "LIMIT 1"
        } else {
            "ORDER BY amount DESC"
        };

        Ok(Query::new(format!(
            "SELECT {} FROM `{}.{}` WHERE {} = @{} {}",
            self.columns(),
            schema,
            self.table(),
            column,
            column,
            tail
        ))
        .param(column, Some(key.to_string())))
    }
}

/// Arguments of the `getDataAmountWithFilters` table function.
///
/// Exactly one of `position_group` and `position` must be set, the seniority,
/// country and contract type filters are required, `tech` is optional. Multi
/// valued filters are `|` separated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataAmountFilter {
    pub position_group: Option<String>,
    pub position: Option<String>,
    pub seniority: String,
    pub country_salary: String,
    pub contract_type: String,
    pub tech: Option<String>,
}

impl DataAmountFilter {
    pub fn validate(&self) -> WarehouseResult<()> {
        let group = self.position_group.as_deref().map_or(false, |v| !v.is_empty());
        let position = self.position.as_deref().map_or(false, |v| !v.is_empty());
        if group == position {
            return Err(WarehouseError::InvalidFilter {
                message: "Either parameter_position_group or parameter_position must be provided, but not both"
                    .to_string(),
            });
        }

        if self.seniority.is_empty() || self.country_salary.is_empty() || self.contract_type.is_empty() {
            return Err(WarehouseError::InvalidFilter {
                message: "parameter_seniority, parameter_country_salary, and parameter_contract_type are required"
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn query(&self, schema: &str) -> WarehouseResult<Query> {
        self.validate()?;
        let schema = validate_identifier(schema)?;

        Ok(Query::new(format!(
            "SELECT * FROM `{}.getDataAmountWithFilters`(@parameter_position_group, @parameter_position, \
             @parameter_seniority, @parameter_country_salary, @parameter_contract_type, @parameter_tech)",
            schema
        ))
        .param("parameter_position_group", self.position_group.clone())
        .param("parameter_position", self.position.clone())
        .param("parameter_seniority", Some(self.seniority.clone()))
        .param("parameter_country_salary", Some(self.country_salary.clone()))
        .param("parameter_contract_type", Some(self.contract_type.clone()))
        .param("parameter_tech", self.tech.clone()))
    }
}
