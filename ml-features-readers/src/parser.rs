//! Schema-driven parsing of serialized examples into tensors

use std::collections::BTreeMap;

use tracing::debug;

use ml_features_core::{DataType, DenseTensor, SparseTensor, Tensor, TensorData};

use crate::error::{Error, Result};
use crate::example::{Example, Feature};
use crate::spec::{FeatureSpec, ParseSpec};

/// Parse a batch of serialized examples.
///
/// Every feature named in `spec` becomes one tensor in the result: fixed
/// length features become dense `[batch, shape...]` tensors and variable
/// length features become sparse `[batch, max_len]` tensors. When given,
/// `example_names` must be parallel to `serialized` and is only used to make
/// error messages point at the offending record.
pub fn parse_example<B: AsRef<[u8]>>(
    serialized: &[B],
    spec: &ParseSpec,
    example_names: Option<&[String]>,
) -> Result<BTreeMap<String, Tensor>> {
    if let Some(names) = example_names {
        if names.len() != serialized.len() {
            return Err(Error::InvalidArgument(format!(
                "example_names has {} entries but {} examples were given",
                names.len(),
                serialized.len()
            )));
        }
    }

    debug!(batch = serialized.len(), features = spec.len(), "Parsing examples");

    let examples = serialized
        .iter()
        .map(|bytes| Example::deserialize(bytes.as_ref()))
        .collect::<Result<Vec<_>>>()?;

    let parser = BatchParser {
        examples: &examples,
        example_names,
    };

    let mut tensors = BTreeMap::new();
    for (name, feature_spec) in spec {
        check_parse_type(name, feature_spec.dtype())?;
        let tensor = match feature_spec {
            FeatureSpec::FixedLen {
                shape,
                dtype,
                default_value,
            } => parser.fixed_len(name, shape, *dtype, default_value.as_deref())?,
            FeatureSpec::VarLen { dtype } => parser.var_len(name, *dtype)?,
        };
        tensors.insert(name.clone(), tensor);
    }

    Ok(tensors)
}

fn check_parse_type(feature: &str, dtype: DataType) -> Result<()> {
    match dtype {
        DataType::String
        | DataType::Int32
        | DataType::Int64
        | DataType::Float32
        | DataType::Float64 => Ok(()),
        DataType::Boolean => Err(Error::UnsupportedType {
            feature: feature.to_string(),
            dtype,
        }),
    }
}

struct BatchParser<'a> {
    examples: &'a [Example],
    example_names: Option<&'a [String]>,
}

impl BatchParser<'_> {
    fn example_name(&self, index: usize) -> String {
        self.example_names
            .and_then(|names| names.get(index).cloned())
            .unwrap_or_else(|| index.to_string())
    }

    fn format_error(&self, index: usize, feature: &str, message: String) -> Error {
        Error::Format {
            example: self.example_name(index),
            feature: feature.to_string(),
            message,
        }
    }

    fn values(
        &self,
        index: usize,
        name: &str,
        feature: &Feature,
        dtype: DataType,
    ) -> Result<TensorData> {
        Ok(match (dtype, feature) {
            (DataType::String, Feature::BytesList(v)) => TensorData::String(
                v.iter()
                    .map(|b| {
                        String::from_utf8(b.clone()).map_err(|e| {
                            self.format_error(index, name, format!("invalid UTF-8: {e}"))
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            (DataType::Int64, Feature::Int64List(v)) => TensorData::Int64(v.clone()),
            (DataType::Int32, Feature::Int64List(v)) => TensorData::Int32(
                v.iter()
                    .map(|&x| {
                        i32::try_from(x).map_err(|_| {
                            self.format_error(index, name, format!("value {x} overflows Int32"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            (DataType::Float32, Feature::FloatList(v)) => TensorData::Float32(v.clone()),
            (DataType::Float64, Feature::FloatList(v)) => {
                TensorData::Float64(v.iter().map(|&x| f64::from(x)).collect())
            }
            (dtype, other) => {
                return Err(self.format_error(
                    index,
                    name,
                    format!("cannot parse {} as {dtype}", other.kind()),
                ))
            }
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn default_values(&self, name: &str, dtype: DataType, defaults: &[f64]) -> Result<TensorData> {
        let integral = |x: f64| {
            if x.fract() == 0.0 {
                Ok(x as i64)
            } else {
                Err(Error::Schema(format!(
                    "default value {x} for feature {name} is not an integer"
                )))
            }
        };

        Ok(match dtype {
            DataType::Float32 => TensorData::Float32(defaults.iter().map(|&x| x as f32).collect()),
            DataType::Float64 => TensorData::Float64(defaults.to_vec()),
            DataType::Int64 => TensorData::Int64(
                defaults.iter().map(|&x| integral(x)).collect::<Result<Vec<_>>>()?,
            ),
            DataType::Int32 => TensorData::Int32(
                defaults
                    .iter()
                    .map(|&x| {
                        integral(x).and_then(|v| {
                            i32::try_from(v).map_err(|_| {
                                Error::Schema(format!(
                                    "default value {x} for feature {name} overflows Int32"
                                ))
                            })
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            DataType::String | DataType::Boolean => {
                return Err(Error::UnsupportedType {
                    feature: name.to_string(),
                    dtype,
                })
            }
        })
    }

    fn fixed_len(
        &self,
        name: &str,
        shape: &[usize],
        dtype: DataType,
        default_value: Option<&[f64]>,
    ) -> Result<Tensor> {
        let per_example: usize = shape.iter().product();
        let default = match default_value {
            Some(values) if values.len() != per_example => {
                return Err(Error::Schema(format!(
                    "default value for feature {name} has {} values, expected {per_example}",
                    values.len()
                )))
            }
            Some(values) => Some(self.default_values(name, dtype, values)?),
            None => None,
        };

        let mut parts = Vec::with_capacity(self.examples.len());
        for (index, example) in self.examples.iter().enumerate() {
            let values = match (example.feature(name), &default) {
                (Some(feature), _) => self.values(index, name, feature, dtype)?,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(Error::MissingFeature {
                        example: self.example_name(index),
                        feature: name.to_string(),
                    })
                }
            };
            if values.len() != per_example {
                return Err(self.format_error(
                    index,
                    name,
                    format!("expected {per_example} values, got {}", values.len()),
                ));
            }
            parts.push(values);
        }

        let mut full_shape = Vec::with_capacity(shape.len() + 1);
        full_shape.push(self.examples.len());
        full_shape.extend_from_slice(shape);

        let data = TensorData::concat(dtype, parts)?;
        Ok(DenseTensor::new(data, full_shape)?.into())
    }

    fn var_len(&self, name: &str, dtype: DataType) -> Result<Tensor> {
        let mut parts = Vec::with_capacity(self.examples.len());
        let mut indices = Vec::new();
        let mut width = 0;
        for (index, example) in self.examples.iter().enumerate() {
            let Some(feature) = example.feature(name) else {
                continue;
            };
            let values = self.values(index, name, feature, dtype)?;
            for j in 0..values.len() {
                indices.push(index);
                indices.push(j);
            }
            width = width.max(values.len());
            parts.push(values);
        }

        let data = TensorData::concat(dtype, parts)?;
        Ok(SparseTensor::from_coo(data, indices, vec![self.examples.len(), width])?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn serialize(examples: &[Example]) -> Vec<Vec<u8>> {
        examples.iter().map(|e| e.serialize().unwrap()).collect()
    }

    fn batch() -> Vec<Vec<u8>> {
        serialize(&[
            Example::new()
                .with_feature("age", Feature::FloatList(vec![23.0]))
                .with_feature("query_word", Feature::bytes(&["rust", "tensor"])),
            Example::new()
                .with_feature("age", Feature::FloatList(vec![41.0]))
                .with_feature("query_word", Feature::bytes(&["graph"])),
            Example::new().with_feature("query_word", Feature::bytes::<&str>(&[])),
        ])
    }

    #[test]
    fn test_fixed_and_var_len() {
        let mut spec = ParseSpec::new();
        spec.insert(
            "age".into(),
            FeatureSpec::FixedLen {
                shape: vec![1],
                dtype: DataType::Float32,
                default_value: Some(vec![-1.0]),
            },
        );
        spec.insert("query_word".into(), FeatureSpec::VarLen { dtype: DataType::String });

        let tensors = parse_example(&batch(), &spec, None).unwrap();

        let age = tensors["age"].as_dense().unwrap();
        assert_eq!(age.shape(), &[3, 1]);
        assert_eq!(age.as_f32_slice().unwrap(), &[23.0, 41.0, -1.0]);

        let words = tensors["query_word"].as_sparse().unwrap();
        assert_eq!(words.shape(), &[3, 2]);
        assert_eq!(words.nnz(), 3);
        assert_eq!(
            words.values().as_strings().unwrap(),
            &["rust", "tensor", "graph"]
        );
        assert_eq!(words.index(2), &[1, 0]);
    }

    #[test]
    fn test_missing_required_feature_names_example() {
        let mut spec = ParseSpec::new();
        spec.insert(
            "age".into(),
            FeatureSpec::FixedLen {
                shape: vec![1],
                dtype: DataType::Float32,
                default_value: None,
            },
        );
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let err = parse_example(&batch(), &spec, Some(&names)).unwrap_err();
        match err {
            Error::MissingFeature { example, feature } => {
                assert_eq!(example, "c");
                assert_eq!(feature, "age");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let serialized = serialize(&[
            Example::new().with_feature("query_word", Feature::bytes(&["rust"])),
            Example::new().with_feature("query_word", Feature::BytesList(vec![vec![0xff, 0xfe]])),
        ]);
        let names = vec!["first".to_string(), "second".to_string()];
        let mut spec = ParseSpec::new();
        spec.insert("query_word".into(), FeatureSpec::VarLen { dtype: DataType::String });

        match parse_example(&serialized, &spec, Some(&names)) {
            Err(Error::Format { example, feature, .. }) => {
                assert_eq!(example, "second");
                assert_eq!(feature, "query_word");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test_case(DataType::Int64 ; "int64 from floats")]
    #[test_case(DataType::String ; "string from floats")]
    fn test_kind_mismatch(dtype: DataType) {
        let mut spec = ParseSpec::new();
        spec.insert("age".into(), FeatureSpec::VarLen { dtype });
        assert!(matches!(
            parse_example(&batch(), &spec, None),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_wrong_value_count() {
        let serialized = serialize(&[
            Example::new().with_feature("v", Feature::Int64List(vec![1, 2, 3]))
        ]);
        let mut spec = ParseSpec::new();
        spec.insert(
            "v".into(),
            FeatureSpec::FixedLen {
                shape: vec![2],
                dtype: DataType::Int64,
                default_value: None,
            },
        );
        assert!(matches!(
            parse_example(&serialized, &spec, None),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_boolean_is_unsupported() {
        let mut spec = ParseSpec::new();
        spec.insert("flag".into(), FeatureSpec::VarLen { dtype: DataType::Boolean });
        assert!(matches!(
            parse_example(&batch(), &spec, None),
            Err(Error::UnsupportedType { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_var_len_keeps_every_value(rows in prop::collection::vec(
            prop::collection::vec(any::<i64>(), 0..5),
            1..8,
        )) {
            let serialized = serialize(
                &rows
                    .iter()
                    .map(|r| Example::new().with_feature("ids", Feature::Int64List(r.clone())))
                    .collect::<Vec<_>>(),
            );
            let mut spec = ParseSpec::new();
            spec.insert("ids".into(), FeatureSpec::VarLen { dtype: DataType::Int64 });

            let tensors = parse_example(&serialized, &spec, None).unwrap();
            let ids = tensors["ids"].as_sparse().unwrap();
            let flat: Vec<i64> = rows.iter().flatten().copied().collect();
            prop_assert_eq!(ids.values().as_i64().unwrap(), flat.as_slice());
            prop_assert_eq!(ids.batch_size(), rows.len());
        }
    }

    #[test]
    fn test_example_names_length_checked() {
        let names = vec!["only-one".to_string()];
        assert!(matches!(
            parse_example(&batch(), &ParseSpec::new(), Some(&names)),
            Err(Error::InvalidArgument(_))
        ));
    }
}
