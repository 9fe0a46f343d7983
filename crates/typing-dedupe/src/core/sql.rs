//! SQL text produced by generators, grouped into transactions.

use serde::Serialize;

/// An ordered list of transactions, each an ordered list of statements.
///
/// Handlers execute the transactions in order and every statement within a
/// transaction atomically. Blank statements are dropped at construction, so
/// an empty `Sql` executes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sql {
    pub transactions: Vec<Vec<String>>,
}

impl Sql {
    /// A single transaction holding a single statement.
    pub fn of(statement: impl Into<String>) -> Self {
        Self::transactionally([statement])
    }

    /// A single transaction holding every statement.
    pub fn transactionally<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create([non_blank(statements)])
    }

    /// One transaction per statement.
    pub fn separately<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::create(non_blank(statements).into_iter().map(|s| vec![s]))
    }

    /// Concatenate several `Sql`s, keeping their transaction boundaries.
    pub fn concat<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Sql>,
    {
        Self::create(parts.into_iter().flat_map(|sql| sql.transactions))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Every statement, flattened across transactions.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().flatten().map(String::as_str)
    }

    fn create<I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        Self {
            transactions: transactions.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }
}

fn non_blank<I, S>(statements: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    statements
        .into_iter()
        .map(Into::into)
        .filter(|s| !s.trim().is_empty())
        .collect()
}
