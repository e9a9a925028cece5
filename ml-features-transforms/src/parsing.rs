//! Parsing serialized examples straight into transformed feature columns

use std::sync::Arc;

use tracing::debug;

use ml_features_core::Graph;
use ml_features_readers::{parse_example, ParseSpec};

use crate::column::FeatureColumn;
use crate::error::Result;
use crate::layers::sorted_by_key;
use crate::transformer::{ColumnsToTensors, Transformer};
use crate::validation::check_feature_columns;

/// Collect the parse spec of every raw field the columns read.
///
/// Fails if two columns need the same field parsed in different ways.
pub fn create_feature_spec_for_parsing(feature_columns: &[Arc<dyn FeatureColumn>]) -> Result<ParseSpec> {
    let mut specs = ParseSpec::new();
    for column in feature_columns {
        column.add_parse_spec(&mut specs)?;
    }
    Ok(specs)
}

/// Parse a batch of serialized examples and transform every column once.
///
/// The returned mapping holds the parsed raw fields and the transformed
/// tensor of every column, ready to be handed to the layer builders.
pub fn parse_feature_columns_from_examples<B: AsRef<[u8]>>(
    serialized: &[B],
    feature_columns: &[Arc<dyn FeatureColumn>],
    graph: &mut Graph,
    name: Option<&str>,
    example_names: Option<&[String]>,
) -> Result<ColumnsToTensors> {
    check_feature_columns(feature_columns)?;
    let specs = create_feature_spec_for_parsing(feature_columns)?;
    let op_name = graph.record_op("ParseExample");
    debug!(
        op = %op_name,
        name = name.unwrap_or_default(),
        fields = specs.len(),
        "Parsing feature columns"
    );

    let mut columns_to_tensors: ColumnsToTensors =
        parse_example(serialized, &specs, example_names)?.into_iter().collect();

    let mut transformer = Transformer::new(&mut columns_to_tensors, graph);
    for column in sorted_by_key(feature_columns) {
        transformer.transform(column.as_ref())?;
    }

    Ok(columns_to_tensors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{BucketizedColumn, CrossedColumn, EmbeddingColumn, RealValuedColumn, SparseColumn};
    use crate::config::LayerOptions;
    use crate::error::Error;
    use crate::layers::input_from_feature_columns;
    use crate::transformer::TensorKey;
    use ml_features_readers::{Example, Feature, FeatureSpec};

    fn serialized() -> Vec<Vec<u8>> {
        [
            Example::new()
                .with_feature("age", Feature::FloatList(vec![19.0]))
                .with_feature("query_word", Feature::bytes(&["rust"])),
            Example::new().with_feature("query_word", Feature::bytes(&["graph", "tensor"])),
        ]
        .iter()
        .map(|e| e.serialize().unwrap())
        .collect()
    }

    fn columns() -> Vec<Arc<dyn FeatureColumn>> {
        let age = RealValuedColumn::scalar("age").with_default(vec![40.0]).unwrap();
        let age_bucket: Arc<dyn FeatureColumn> =
            Arc::new(BucketizedColumn::new(age, vec![18.0, 21.0, 30.0]).unwrap());
        let query_word: Arc<dyn FeatureColumn> =
            Arc::new(SparseColumn::with_hash_bucket("query_word", 1000).unwrap());
        vec![
            Arc::clone(&age_bucket),
            Arc::new(EmbeddingColumn::new(Arc::clone(&query_word), 4).unwrap()),
            Arc::new(CrossedColumn::new(vec![age_bucket, query_word], 1000).unwrap()),
        ]
    }

    #[test]
    fn test_feature_spec_merges_shared_fields() {
        let specs = create_feature_spec_for_parsing(&columns()).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs["query_word"],
            FeatureSpec::VarLen { dtype: ml_features_core::DataType::String }
        );
    }

    #[test]
    fn test_conflicting_field_specs() {
        let columns: Vec<Arc<dyn FeatureColumn>> = vec![
            Arc::new(RealValuedColumn::scalar("age")),
            Arc::new(SparseColumn::with_hash_bucket("age", 10).unwrap()),
        ];
        assert!(matches!(
            create_feature_spec_for_parsing(&columns),
            Err(Error::Reader(ml_features_readers::Error::Schema(_)))
        ));
    }

    #[test]
    fn test_parse_then_build_reuses_transforms() {
        let columns = columns();
        let mut graph = Graph::default();

        let mut mapping =
            parse_feature_columns_from_examples(&serialized(), &columns, &mut graph, None, None)
                .unwrap();

        assert!(mapping.contains(&TensorKey::Raw("age".to_string())));
        for column in &columns {
            assert!(mapping.column(column.as_ref()).is_some());
        }
        let buckets = mapping.column(columns[0].as_ref()).unwrap();
        assert_eq!(buckets.as_dense().unwrap().as_i64_slice().unwrap(), &[1, 3]);
        assert_eq!(graph.op_count("Bucketize"), 1);
        assert_eq!(graph.op_count("StringToHashBucketFast"), 1);

        let dense_columns = vec![Arc::clone(&columns[0]), Arc::clone(&columns[1])];
        let output = input_from_feature_columns(
            &mut mapping,
            &dense_columns,
            &mut graph,
            &LayerOptions::default(),
        )
        .unwrap();
        assert_eq!(output.shape(), &[2, 4 + 4]);
        assert_eq!(graph.op_count("Bucketize"), 1);
        assert_eq!(graph.op_count("StringToHashBucketFast"), 1);
    }

    #[test]
    fn test_parse_errors_name_the_example() {
        let columns: Vec<Arc<dyn FeatureColumn>> = vec![Arc::new(RealValuedColumn::scalar("age"))];
        let names = vec!["first".to_string(), "second".to_string()];
        let err = parse_feature_columns_from_examples(
            &serialized(),
            &columns,
            &mut Graph::default(),
            Some("parse"),
            Some(&names),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Reader(ml_features_readers::Error::MissingFeature { example, .. }) if example == "second"
        ));
    }
}
