use crate::config::Configuration;
use crate::reflection;
use crate::scripting::expr::Scope;
use crate::value::Value;
use std::collections::HashMap;

pub const PARAMETER_KEY: &str = "_parameter";
pub const DATABASE_ID_KEY: &str = "_databaseId";

/// Mutable assembly state threaded through `SqlNode::apply`: the SQL
/// fragments appended so far, the dynamic bindings visible to expressions,
/// and the monotonic counter that keeps nested `<foreach>` placeholders
/// distinct.
pub struct DynamicContext<'a> {
    parameter: &'a Value,
    bindings: HashMap<String, Value>,
    fragments: Vec<String>,
    unique_number: usize,
}

/// Snapshot of a finished assembly.
pub struct AssembledSql {
    pub sql: String,
    pub bindings: HashMap<String, Value>,
}

impl<'a> DynamicContext<'a> {
    pub fn new(configuration: &Configuration, parameter: &'a Value) -> Self {
        let mut bindings = HashMap::new();
        if let Some(id) = configuration.database_id() {
            bindings.insert(DATABASE_ID_KEY.to_string(), Value::Text(id.to_string()));
        }
        Self {
            parameter,
            bindings,
            fragments: Vec::new(),
            unique_number: 0,
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn remove_binding(&mut self, name: &str) {
        self.bindings.remove(name);
    }

    pub fn append_sql(&mut self, fragment: &str) {
        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            self.fragments.push(trimmed.to_string());
        }
    }

    pub fn next_unique(&mut self) -> usize {
        let n = self.unique_number;
        self.unique_number += 1;
        n
    }

    /// Redirects appends into a scratch buffer; pass the returned token to
    /// [`end_scope`](Self::end_scope) to collect the scratch text and
    /// restore the outer buffer.
    pub fn begin_scope(&mut self) -> Vec<String> {
        std::mem::take(&mut self.fragments)
    }

    pub fn end_scope(&mut self, saved: Vec<String>) -> String {
        let inner = self.fragments.join(" ");
        self.fragments = saved;
        inner
    }

    pub fn sql(&self) -> String {
        self.fragments.join(" ")
    }

    pub fn into_bindings_and_sql(self) -> AssembledSql {
        AssembledSql {
            sql: self.fragments.join(" "),
            bindings: self.bindings,
        }
    }
}

impl Scope for DynamicContext<'_> {
    fn lookup(&self, name: &str) -> Value {
        if name == PARAMETER_KEY {
            return self.parameter.clone();
        }
        if let Some(v) = self.bindings.get(name) {
            return v.clone();
        }
        // Dotted paths may root at a binding (loop variables) before
        // falling back to the parameter object.
        if let Some((root, rest)) = name.split_once('.')
            && let Some(bound) = self.bindings.get(root)
        {
            return reflection::get_value(bound, rest).clone();
        }
        match self.parameter {
            Value::Map(_) => reflection::get_value(self.parameter, name).clone(),
            scalar if name == "value" => scalar.clone(),
            _ => Value::Null,
        }
    }
}
