use crate::error::Result;
use crate::metadata::{AttributeValue, Attributes, Variable, VariableData};
use std::collections::{BTreeMap, BTreeSet};

/// CF decoding knobs applied on top of what the store returns.
///
/// `use_cftime` and `decode_timedelta` default to `None`, meaning "follow
/// `decode_times`".
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub mask_and_scale: bool,
    pub decode_times: bool,
    pub concat_characters: bool,
    pub decode_coords: bool,
    pub drop_variables: Vec<String>,
    pub use_cftime: Option<bool>,
    pub decode_timedelta: Option<bool>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            mask_and_scale: true,
            decode_times: true,
            concat_characters: true,
            decode_coords: true,
            drop_variables: Vec::new(),
            use_cftime: None,
            decode_timedelta: None,
        }
    }
}

const MASK_AND_SCALE_ATTRS: &[&str] =
    &["scale_factor", "add_offset", "_FillValue", "missing_value"];

const TIMEDELTA_UNITS: &[&str] = &["hours", "minutes", "seconds", "h", "min", "s"];

/// Applies CF decoding to every variable: drops the requested names,
/// unpacks masked/scaled values, and moves time-related `units` attributes
/// into encoding so decoded variables no longer advertise raw units.
pub fn decode_cf_variables(
    mut variables: BTreeMap<String, Variable>,
    mut coord_names: BTreeSet<String>,
    options: &DecodeOptions,
) -> Result<(BTreeMap<String, Variable>, BTreeSet<String>)> {
    for name in &options.drop_variables {
        variables.remove(name);
        coord_names.remove(name);
    }

    for variable in variables.values_mut() {
        decode_cf_variable(variable, options)?;
    }

    if !options.decode_coords {
        coord_names.clear();
    }

    Ok((variables, coord_names))
}

fn decode_cf_variable(variable: &mut Variable, options: &DecodeOptions) -> Result<()> {
    if options.mask_and_scale {
        mask_and_scale(variable)?;
    }

    let decode_timedelta = options.decode_timedelta.unwrap_or(options.decode_times);
    if decode_timedelta && has_timedelta_units(&variable.attributes) {
        move_attr(variable, "units");
    }
    if options.decode_times && has_epoch_units(&variable.attributes) {
        move_attr(variable, "units");
        move_attr(variable, "calendar");
    }

    Ok(())
}

/// Pops the packing attributes into encoding and, for in-memory data,
/// applies them: fill values become NaN, then `scale_factor` and
/// `add_offset` unpack the rest. Lazy data is left untouched, the decoder
/// already hands back unpacked floats with NaN for bitmapped-out points.
fn mask_and_scale(variable: &mut Variable) -> Result<()> {
    let mut popped = Attributes::new();
    for key in MASK_AND_SCALE_ATTRS {
        if let Some(value) = variable.attributes.remove(*key) {
            popped.insert((*key).to_string(), value);
        }
    }
    if popped.is_empty() {
        return Ok(());
    }

    if let VariableData::Eager(arr) = &mut variable.data {
        let fill = popped
            .get("_FillValue")
            .or_else(|| popped.get("missing_value"))
            .and_then(AttributeValue::as_f64);
        let scale = popped
            .get("scale_factor")
            .and_then(AttributeValue::as_f64)
            .unwrap_or(1.0);
        let offset = popped
            .get("add_offset")
            .and_then(AttributeValue::as_f64)
            .unwrap_or(0.0);

        for value in &mut arr.values {
            if Some(*value) == fill {
                *value = f64::NAN;
            } else {
                *value = *value * scale + offset;
            }
        }
    }

    variable.encoding.extend(popped);
    Ok(())
}

fn has_timedelta_units(attrs: &Attributes) -> bool {
    attrs
        .get("units")
        .and_then(AttributeValue::as_str)
        .is_some_and(|units| TIMEDELTA_UNITS.contains(&units))
}

fn has_epoch_units(attrs: &Attributes) -> bool {
    attrs
        .get("units")
        .and_then(AttributeValue::as_str)
        .is_some_and(|units| units.contains(" since "))
}

fn move_attr(variable: &mut Variable, key: &str) {
    if let Some(value) = variable.attributes.remove(key) {
        variable.encoding.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::{ArrayData, DType};

    fn eager(values: Vec<f64>, attributes: Attributes) -> Variable {
        let len = values.len();
        Variable {
            dimensions: vec!["x".to_string()],
            data: VariableData::Eager(ArrayData::new(vec![len], DType::F64, values)),
            attributes,
            encoding: Attributes::new(),
        }
    }

    fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_mask_and_scale_unpacks_eager_values() {
        let mut var = eager(
            vec![0.0, 10.0, -999.0],
            attrs(&[
                ("scale_factor", AttributeValue::Number(0.5)),
                ("add_offset", AttributeValue::Number(273.15)),
                ("_FillValue", AttributeValue::Number(-999.0)),
            ]),
        );
        decode_cf_variable(&mut var, &DecodeOptions::default()).unwrap();

        let arr = match &var.data {
            VariableData::Eager(arr) => arr,
            _ => unreachable!(),
        };
        assert_eq!(arr.values[0], 273.15);
        assert_eq!(arr.values[1], 278.15);
        assert!(arr.values[2].is_nan());
        assert!(var.attributes.is_empty());
        assert!(var.encoding.contains_key("scale_factor"));
    }

    #[test]
    fn test_mask_and_scale_disabled_keeps_attrs() {
        let mut var = eager(
            vec![0.0, 10.0],
            attrs(&[("scale_factor", AttributeValue::Number(0.5))]),
        );
        let options = DecodeOptions {
            mask_and_scale: false,
            ..DecodeOptions::default()
        };
        decode_cf_variable(&mut var, &options).unwrap();
        assert!(var.attributes.contains_key("scale_factor"));
        assert!(var.encoding.is_empty());
    }

    #[test]
    fn test_timedelta_units_move_to_encoding() {
        let mut var = eager(
            vec![0.0, 6.0],
            attrs(&[(
                "units",
                AttributeValue::String("hours".to_string()),
            )]),
        );
        decode_cf_variable(&mut var, &DecodeOptions::default()).unwrap();
        assert!(!var.attributes.contains_key("units"));
        assert_eq!(
            var.encoding.get("units").and_then(AttributeValue::as_str),
            Some("hours")
        );
    }

    #[test]
    fn test_decode_timedelta_false_keeps_units() {
        let mut var = eager(
            vec![0.0, 6.0],
            attrs(&[(
                "units",
                AttributeValue::String("hours".to_string()),
            )]),
        );
        let options = DecodeOptions {
            decode_timedelta: Some(false),
            ..DecodeOptions::default()
        };
        decode_cf_variable(&mut var, &options).unwrap();
        assert!(var.attributes.contains_key("units"));
    }

    #[test]
    fn test_drop_variables_and_coords() {
        let mut variables = BTreeMap::new();
        variables.insert("keep".to_string(), eager(vec![1.0], Attributes::new()));
        variables.insert("drop".to_string(), eager(vec![1.0], Attributes::new()));
        variables.insert("step".to_string(), eager(vec![0.0], Attributes::new()));
        let coord_names: BTreeSet<String> = ["step".to_string(), "drop".to_string()].into();

        let options = DecodeOptions {
            drop_variables: vec!["drop".to_string()],
            ..DecodeOptions::default()
        };
        let (variables, coord_names) =
            decode_cf_variables(variables, coord_names, &options).unwrap();
        assert!(variables.contains_key("keep"));
        assert!(!variables.contains_key("drop"));
        assert_eq!(coord_names, ["step".to_string()].into());
    }

    #[test]
    fn test_decode_coords_false_demotes_coordinates() {
        let mut variables = BTreeMap::new();
        variables.insert("step".to_string(), eager(vec![0.0], Attributes::new()));
        let coord_names: BTreeSet<String> = ["step".to_string()].into();

        let options = DecodeOptions {
            decode_coords: false,
            ..DecodeOptions::default()
        };
        let (variables, coord_names) =
            decode_cf_variables(variables, coord_names, &options).unwrap();
        assert!(variables.contains_key("step"));
        assert!(coord_names.is_empty());
    }
}
