use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::storage::NodeStore;
use crate::types::{ColumnAttr, ColumnType, DataType};

use super::Spec;

/// Owned, serializable description of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: DataType,
    /// Storage type. Descriptors fed to [`Spec::extend_from`] always create
    /// plain columns; a `StringEnum` here only records an upgrade.
    pub column_type: ColumnType,
    #[serde(default)]
    pub attr: ColumnAttr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subspec: Option<SchemaDescriptor>,
}

/// Owned, serializable snapshot of a spec tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub columns: Vec<ColumnDescriptor>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain column.
    pub fn column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column_with_attr(name, data_type, ColumnAttr::empty())
    }

    pub fn column_with_attr(
        mut self,
        name: impl Into<String>,
        data_type: DataType,
        attr: ColumnAttr,
    ) -> Self {
        let subspec = (data_type == DataType::Table).then(SchemaDescriptor::default);
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            data_type,
            column_type: ColumnType::from(data_type),
            attr,
            subspec,
        });
        self
    }

    /// Append a `Table` column whose rows follow `subspec`.
    pub fn table(mut self, name: impl Into<String>, subspec: SchemaDescriptor) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            data_type: DataType::Table,
            column_type: ColumnType::Table,
            attr: ColumnAttr::empty(),
            subspec: Some(subspec),
        });
        self
    }
}

impl Spec {
    /// Snapshot the spec tree into an owned descriptor.
    pub fn describe(&self, store: &impl NodeStore) -> SchemaDescriptor {
        let columns = (0..self.column_count(store))
            .map(|ndx| {
                let column_type = self.real_column_type(store, ndx);
                let subspec = (column_type == ColumnType::Table)
                    .then(|| Spec::from_subspec(store, self.subtable_spec(store, ndx)).describe(store));
                ColumnDescriptor {
                    name: self.column_name(store, ndx).to_owned(),
                    data_type: column_type.data_type(),
                    column_type,
                    attr: self.column_attr(store, ndx),
                    subspec,
                }
            })
            .collect();
        SchemaDescriptor { columns }
    }

    /// Append every column of `descriptor`, recursing into subspecs.
    pub fn extend_from(
        &mut self,
        store: &mut impl NodeStore,
        descriptor: &SchemaDescriptor,
    ) -> Result<(), Error> {
        for column in &descriptor.columns {
            let ndx = self.add_column(store, column.data_type, &column.name, column.attr)?;
            if column.data_type != DataType::Table {
                continue;
            }
            if let Some(subspec) = &column.subspec {
                let mut child = Spec::from_subspec(&*store, self.subtable_spec(&*store, ndx));
                child.extend_from(store, subspec)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NodePath, SlabStore};

    fn orders() -> SchemaDescriptor {
        SchemaDescriptor::new()
            .column_with_attr("id", DataType::Int, ColumnAttr::INDEXED)
            .column("customer", DataType::String)
            .table(
                "lines",
                SchemaDescriptor::new()
                    .column("sku", DataType::String)
                    .column("qty", DataType::Int)
                    .table("notes", SchemaDescriptor::new().column("text", DataType::String)),
            )
            .column("total", DataType::Double)
    }

    #[test]
    fn test_extend_then_describe() {
        let mut store = SlabStore::new();
        let mut spec = Spec::create(&mut store, NodePath::root()).unwrap();
        spec.extend_from(&mut store, &orders()).unwrap();

        assert_eq!(spec.column_count(&store), 4);
        assert_eq!(spec.num_subspecs(&store), 1);
        spec.verify(&store).unwrap();
        assert_eq!(spec.describe(&store), orders());
    }

    #[test]
    fn test_describe_records_enum_upgrade() {
        let mut store = SlabStore::new();
        let mut spec = Spec::create(&mut store, NodePath::root()).unwrap();
        spec.extend_from(&mut store, &orders()).unwrap();
        let keys = store.create_string_node(&["acme", "globex"]).unwrap();
        spec.upgrade_string_to_enum(&mut store, 1, keys).unwrap();

        let described = spec.describe(&store);
        assert_eq!(described.columns[1].column_type, ColumnType::StringEnum);
        assert_eq!(described.columns[1].data_type, DataType::String);
    }

    #[test]
    fn test_descriptor_json() {
        let json = serde_json::to_value(orders()).unwrap();
        assert_eq!(json["columns"][0]["name"], "id");
        assert_eq!(json["columns"][0]["data_type"], "Int");
        assert_eq!(json["columns"][2]["subspec"]["columns"][2]["name"], "notes");
        assert!(json["columns"][1].get("subspec").is_none());

        let back: SchemaDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, orders());
    }

    #[test]
    fn test_extend_builds_structurally_equal_specs() {
        let mut a = SlabStore::new();
        let mut b = SlabStore::new();
        let mut spec_a = Spec::create(&mut a, NodePath::root()).unwrap();
        let mut spec_b = Spec::create(&mut b, NodePath::root()).unwrap();
        spec_a.extend_from(&mut a, &orders()).unwrap();
        spec_b.extend_from(&mut b, &orders()).unwrap();
        assert!(spec_a.equals(&a, &spec_b, &b));
    }
}
