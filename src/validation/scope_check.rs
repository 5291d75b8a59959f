//! Scope allow-list over the parsed query tree.
//!
//! This is the authoritative security stage: every table must belong to the
//! authorized scope, every column to one of the referenced tables (or to an
//! alias the query itself defines), and every function call to the built-in
//! allow-list. It does not trust the lexical stages.

use crate::schema::SchemaSnapshot;
use crate::scope::DatasetScope;
use crate::validation::functions::{is_allowed_function, is_blocked_function};
use crate::validation::verdict::{ValidationStage, Violation, ViolationCode};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    Visit, VisitMut, Visitor, VisitorMut,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::ControlFlow;

/// What to do with a table reference that carries no schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnqualifiedTablePolicy {
    /// Qualify with the scope schema when the scope snapshot has the table.
    QualifyInScope,
    /// Reject every unqualified non-CTE table reference.
    Reject,
}

impl Default for UnqualifiedTablePolicy {
    fn default() -> Self {
        UnqualifiedTablePolicy::QualifyInScope
    }
}

/// Facts about an accepted statement needed by later stages.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeReport {
    pub recursive: bool,
    pub needs_qualification: bool,
}

/// One query level: the CTE names visible in it, and what each of its own
/// CTE bodies may see, in the order the bodies are visited.
struct CteFrame {
    visible: HashSet<String>,
    pending_bodies: VecDeque<HashSet<String>>,
}

/// CTE visibility while walking nested queries.
///
/// A WITH list is visible in the body of the query that declares it and in
/// queries nested there. A non-recursive CTE body sees only the entries
/// declared before it; a recursive list is visible in all of its bodies. A
/// name outside that reach is a real table even if a CTE elsewhere shares it.
#[derive(Default)]
struct CteScopes {
    frames: Vec<CteFrame>,
}

impl CteScopes {
    fn enter(&mut self, query: &Query) {
        // The WITH list is visited before anything else in a query, so the
        // next queries entered directly under a frame are its CTE bodies.
        let inherited = match self.frames.last_mut() {
            Some(parent) => match parent.pending_bodies.pop_front() {
                Some(visible) => visible,
                None => parent.visible.clone(),
            },
            None => HashSet::new(),
        };

        let mut frame = CteFrame {
            visible: inherited.clone(),
            pending_bodies: VecDeque::new(),
        };
        if let Some(with) = &query.with {
            let names: Vec<String> = with.cte_tables.iter().map(|cte| normalize(&cte.alias.name)).collect();
            for i in 0..names.len() {
                let reach = if with.recursive { names.len() } else { i };
                let mut visible = inherited.clone();
                visible.extend(names[..reach].iter().cloned());
                frame.pending_bodies.push_back(visible);
            }
            frame.visible.extend(names);
        }
        self.frames.push(frame);
    }

    fn exit(&mut self) {
        self.frames.pop();
    }

    /// Whether a single-part relation name refers to a CTE at this point.
    fn resolves_to_cte(&self, name: &ObjectName) -> bool {
        match (name.0.as_slice(), self.frames.last()) {
            ([ident], Some(frame)) => frame.visible.contains(&normalize(ident)),
            _ => false,
        }
    }
}

enum AliasTarget {
    Table(ObjectName),
    Derived,
}

#[derive(Default)]
struct ReferenceCollector {
    ctes: CteScopes,
    /// Relations that are not CTE references.
    relations: Vec<ObjectName>,
    cte_names: HashSet<String>,
    aliases: HashMap<String, AliasTarget>,
    output_names: HashSet<String>,
    columns: Vec<Vec<Ident>>,
    functions: Vec<ObjectName>,
    has_locks: bool,
    recursive: bool,
}

/// PostgreSQL folds unquoted identifiers to lower case.
pub(crate) fn normalize(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

impl ReferenceCollector {
    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.output_names.insert(normalize(alias));
                    }
                }
                for twj in &select.from {
                    self.collect_table_with_joins(twj);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            _ => {}
        }
    }

    fn collect_table_with_joins(&mut self, twj: &TableWithJoins) {
        self.collect_table_factor(&twj.relation);
        for join in &twj.joins {
            self.collect_table_factor(&join.relation);
        }
    }

    fn collect_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                if let Some(alias) = alias {
                    self.aliases
                        .insert(normalize(&alias.name), AliasTarget::Table(name.clone()));
                    for c in &alias.columns {
                        self.output_names.insert(normalize(c));
                    }
                }
            }
            TableFactor::Derived { alias, .. } => {
                if let Some(alias) = alias {
                    self.aliases.insert(normalize(&alias.name), AliasTarget::Derived);
                    for c in &alias.columns {
                        self.output_names.insert(normalize(c));
                    }
                }
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                self.collect_table_with_joins(table_with_joins);
                if let Some(alias) = alias {
                    self.aliases.insert(normalize(&alias.name), AliasTarget::Derived);
                }
            }
            _ => {}
        }
    }
}

impl Visitor for ReferenceCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.ctes.enter(query);
        if let Some(with) = &query.with {
            if with.recursive {
                self.recursive = true;
            }
            for cte in &with.cte_tables {
                self.cte_names.insert(normalize(&cte.alias.name));
                for c in &cte.alias.columns {
                    self.output_names.insert(normalize(c));
                }
            }
        }
        if !query.locks.is_empty() {
            self.has_locks = true;
        }
        self.collect_set_expr(&query.body);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.ctes.exit();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if !self.ctes.resolves_to_cte(relation) {
            self.relations.push(relation.clone());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Identifier(ident) => self.columns.push(vec![ident.clone()]),
            Expr::CompoundIdentifier(idents) => self.columns.push(idents.clone()),
            Expr::Function(function) => self.functions.push(function.name.clone()),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

struct ScopeResolver<'a> {
    scope: &'a DatasetScope,
    snapshot: &'a SchemaSnapshot,
}

impl<'a> ScopeResolver<'a> {
    fn authorized(&self, table: &str) -> bool {
        self.scope.permits(table) && self.snapshot.table(table).is_some()
    }

    fn has_column(&self, table: &str, column: &str) -> bool {
        self.authorized(table) && self.snapshot.has_column(table, column)
    }

    /// Table name an object name points at, if it is inside the scope.
    fn resolve_table(&self, name: &ObjectName, cte_names: &HashSet<String>) -> Option<String> {
        let parts: Vec<String> = name.0.iter().map(normalize).collect();
        match parts.as_slice() {
            [table] if !cte_names.contains(table) && self.authorized(table) => Some(table.clone()),
            [schema, table] if schema == &self.scope.schema_name && self.authorized(table) => {
                Some(table.clone())
            }
            _ => None,
        }
    }
}

pub(crate) fn check_scope(
    statement: &Statement,
    scope: &DatasetScope,
    snapshot: &SchemaSnapshot,
    policy: UnqualifiedTablePolicy,
) -> Result<ScopeReport, Vec<Violation>> {
    let mut collector = ReferenceCollector::default();
    let _ = Visit::visit(statement, &mut collector);

    let resolver = ScopeResolver { scope, snapshot };
    let mut violations: Vec<Violation> = Vec::new();
    let mut reject = |code: ViolationCode, detail: String| {
        if !violations.iter().any(|v: &Violation| v.detail == detail) {
            violations.push(Violation::new(code, ValidationStage::ScopeAllowList, detail));
        }
    };

    if collector.has_locks {
        reject(
            ViolationCode::ForbiddenKeyword,
            "row locking clauses are not allowed".to_string(),
        );
    }

    for function in &collector.functions {
        let parts: Vec<String> = function.0.iter().map(normalize).collect();
        let (schema, name) = match parts.as_slice() {
            [name] => (None, name),
            [schema, name] => (Some(schema), name),
            _ => {
                reject(
                    ViolationCode::UnauthorizedReference,
                    format!("function '{}' is not allowed", function),
                );
                continue;
            }
        };

        if is_blocked_function(name) {
            reject(ViolationCode::ForbiddenKeyword, format!("forbidden function {}()", name));
        } else if schema.map_or(false, |s| s != "pg_catalog") {
            reject(
                ViolationCode::UnauthorizedReference,
                format!("function '{}' is outside the built-in catalog", parts.join(".")),
            );
        } else if !is_allowed_function(name) {
            reject(
                ViolationCode::UnauthorizedReference,
                format!("function {}() is not an allowed built-in", name),
            );
        }
    }

    let mut referenced: HashSet<String> = HashSet::new();
    let mut needs_qualification = false;

    for relation in &collector.relations {
        let parts: Vec<String> = relation.0.iter().map(normalize).collect();
        match parts.as_slice() {
            [table] => match policy {
                UnqualifiedTablePolicy::Reject => reject(
                    ViolationCode::UnauthorizedReference,
                    format!("table '{}' must be qualified with schema '{}'", table, scope.schema_name),
                ),
                UnqualifiedTablePolicy::QualifyInScope => {
                    if resolver.authorized(table) {
                        needs_qualification = true;
                        referenced.insert(table.clone());
                    } else {
                        reject(
                            ViolationCode::UnauthorizedReference,
                            format!("table '{}' is not part of dataset scope '{}'", table, scope.schema_name),
                        );
                    }
                }
            },
            [schema, table] => {
                if schema != &scope.schema_name {
                    reject(
                        ViolationCode::UnauthorizedReference,
                        format!("schema '{}' is outside dataset scope '{}'", schema, scope.schema_name),
                    );
                } else if !resolver.authorized(table) {
                    reject(
                        ViolationCode::UnauthorizedReference,
                        format!("table '{}.{}' is not part of dataset scope", schema, table),
                    );
                } else {
                    referenced.insert(table.clone());
                }
            }
            _ => reject(
                ViolationCode::UnauthorizedReference,
                format!("cross-database reference '{}' is not allowed", relation),
            ),
        }
    }

    for column in &collector.columns {
        let parts: Vec<String> = column.iter().map(normalize).collect();
        let ok = match parts.as_slice() {
            [name] => {
                collector.output_names.contains(name)
                    || collector.aliases.contains_key(name)
                    || collector.cte_names.contains(name)
                    || referenced.contains(name)
                    || referenced.iter().any(|t| resolver.has_column(t, name))
            }
            [qualifier, name] => match collector.aliases.get(qualifier) {
                Some(AliasTarget::Table(target)) => {
                    match resolver.resolve_table(target, &collector.cte_names) {
                        Some(table) => resolver.has_column(&table, name),
                        // The relation itself is reported (or is a CTE) above.
                        None => true,
                    }
                }
                Some(AliasTarget::Derived) => true,
                None if referenced.contains(qualifier) => resolver.has_column(qualifier, name),
                None => collector.cte_names.contains(qualifier),
            },
            [schema, table, name] => {
                schema == &scope.schema_name && referenced.contains(table) && resolver.has_column(table, name)
            }
            _ => false,
        };

        if !ok {
            reject(
                ViolationCode::UnauthorizedReference,
                format!(
                    "column '{}' does not belong to any referenced table in scope",
                    parts.join(".")
                ),
            );
        }
    }

    if violations.is_empty() {
        Ok(ScopeReport {
            recursive: collector.recursive,
            needs_qualification,
        })
    } else {
        Err(violations)
    }
}

fn schema_ident(schema: &str) -> Ident {
    let plain = schema
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !schema.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        Ident::new(schema)
    } else {
        Ident::with_quote('"', schema)
    }
}

struct Qualifier {
    schema: Ident,
    ctes: CteScopes,
}

impl VisitorMut for Qualifier {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        self.ctes.enter(query);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.ctes.exit();
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &mut ObjectName) -> ControlFlow<Self::Break> {
        if relation.0.len() == 1 && !self.ctes.resolves_to_cte(relation) {
            relation.0.insert(0, self.schema.clone());
        }
        ControlFlow::Continue(())
    }
}

/// Prefix every unqualified table reference that is not a visible CTE with
/// the scope schema.
pub(crate) fn qualify_tables(statement: &mut Statement, schema: &str) {
    let mut qualifier = Qualifier {
        schema: schema_ident(schema),
        ctes: CteScopes::default(),
    };
    let _ = VisitMut::visit(statement, &mut qualifier);
}
