//! Unit conversion registry (spec §2, SPEC_FULL §9.1).
//!
//! Every unit class except [`UnitClass::Temperature`] converts by a linear
//! scale factor relative to a fixed normalization unit; temperature is
//! affine (Celsius/Fahrenheit/Kelvin) and is handled separately in
//! [`convert`].

use crate::model::UnitClass;

/// A convertible unit: its class and its scale factor relative to the
/// class's normalization unit (the unit `scale == 1.0` is defined against).
#[derive(Debug, Clone, Copy)]
struct UnitDef {
    class: UnitClass,
    scale: f64,
}

fn unit_def(unit: &str) -> Option<UnitDef> {
    use UnitClass::*;
    let def = match unit {
        // Data rate, normalized to bit/s
        "bit/s" => UnitDef { class: DataRate, scale: 1.0 },
        "kbit/s" => UnitDef { class: DataRate, scale: 1_000.0 },
        "Mbit/s" => UnitDef { class: DataRate, scale: 1_000_000.0 },
        "Gbit/s" => UnitDef { class: DataRate, scale: 1_000_000_000.0 },
        "byte/s" => UnitDef { class: DataRate, scale: 8.0 },
        "kB/s" => UnitDef { class: DataRate, scale: 8_000.0 },
        "MB/s" => UnitDef { class: DataRate, scale: 8_000_000.0 },
        "GB/s" => UnitDef { class: DataRate, scale: 8_000_000_000.0 },
        "KiB/s" => UnitDef { class: DataRate, scale: 8_192.0 },
        "MiB/s" => UnitDef { class: DataRate, scale: 8_388_608.0 },
        "GiB/s" => UnitDef { class: DataRate, scale: 8_589_934_592.0 },

        // Distance, normalized to meters
        "mm" => UnitDef { class: Distance, scale: 0.001 },
        "cm" => UnitDef { class: Distance, scale: 0.01 },
        "m" => UnitDef { class: Distance, scale: 1.0 },
        "km" => UnitDef { class: Distance, scale: 1_000.0 },
        "in" => UnitDef { class: Distance, scale: 0.0254 },
        "ft" => UnitDef { class: Distance, scale: 0.3048 },
        "yd" => UnitDef { class: Distance, scale: 0.9144 },
        "mi" => UnitDef { class: Distance, scale: 1_609.344 },

        // Electric current, normalized to amperes
        "mA" => UnitDef { class: ElectricCurrent, scale: 0.001 },
        "A" => UnitDef { class: ElectricCurrent, scale: 1.0 },

        // Electric potential, normalized to volts
        "mV" => UnitDef { class: ElectricPotential, scale: 0.001 },
        "µV" => UnitDef { class: ElectricPotential, scale: 0.000_001 },
        "V" => UnitDef { class: ElectricPotential, scale: 1.0 },
        "kV" => UnitDef { class: ElectricPotential, scale: 1_000.0 },

        // Energy, normalized to watt-hours
        "Wh" => UnitDef { class: Energy, scale: 1.0 },
        "kWh" => UnitDef { class: Energy, scale: 1_000.0 },
        "MWh" => UnitDef { class: Energy, scale: 1_000_000.0 },
        "MJ" => UnitDef { class: Energy, scale: 277.777_777_777_8 },
        "GJ" => UnitDef { class: Energy, scale: 277_777.777_777_8 },
        "J" => UnitDef { class: Energy, scale: 1.0 / 3_600.0 },
        "cal" => UnitDef { class: Energy, scale: 4.184 / 3_600.0 },
        "kcal" => UnitDef { class: Energy, scale: 4_184.0 / 3_600.0 },

        // Information, normalized to bytes
        "bit" => UnitDef { class: Information, scale: 1.0 / 8.0 },
        "B" => UnitDef { class: Information, scale: 1.0 },
        "kB" => UnitDef { class: Information, scale: 1_000.0 },
        "MB" => UnitDef { class: Information, scale: 1_000_000.0 },
        "GB" => UnitDef { class: Information, scale: 1_000_000_000.0 },
        "TB" => UnitDef { class: Information, scale: 1_000_000_000_000.0 },
        "KiB" => UnitDef { class: Information, scale: 1_024.0 },
        "MiB" => UnitDef { class: Information, scale: 1_048_576.0 },
        "GiB" => UnitDef { class: Information, scale: 1_073_741_824.0 },
        "TiB" => UnitDef { class: Information, scale: 1_099_511_627_776.0 },

        // Mass, normalized to grams
        "µg" => UnitDef { class: Mass, scale: 0.000_001 },
        "mg" => UnitDef { class: Mass, scale: 0.001 },
        "g" => UnitDef { class: Mass, scale: 1.0 },
        "kg" => UnitDef { class: Mass, scale: 1_000.0 },
        "oz" => UnitDef { class: Mass, scale: 28.349_523_125 },
        "lb" => UnitDef { class: Mass, scale: 453.592_37 },
        "st" => UnitDef { class: Mass, scale: 6_350.293_18 },

        // Power, normalized to watts
        "mW" => UnitDef { class: Power, scale: 0.001 },
        "W" => UnitDef { class: Power, scale: 1.0 },
        "kW" => UnitDef { class: Power, scale: 1_000.0 },
        "MW" => UnitDef { class: Power, scale: 1_000_000.0 },
        "GW" => UnitDef { class: Power, scale: 1_000_000_000.0 },
        "TW" => UnitDef { class: Power, scale: 1_000_000_000_000.0 },
        "BTU/h" => UnitDef { class: Power, scale: 0.293_071_1 },

        // Pressure, normalized to pascals
        "Pa" => UnitDef { class: Pressure, scale: 1.0 },
        "hPa" => UnitDef { class: Pressure, scale: 100.0 },
        "kPa" => UnitDef { class: Pressure, scale: 1_000.0 },
        "mbar" => UnitDef { class: Pressure, scale: 100.0 },
        "cbar" => UnitDef { class: Pressure, scale: 1_000.0 },
        "bar" => UnitDef { class: Pressure, scale: 100_000.0 },
        "psi" => UnitDef { class: Pressure, scale: 6_894.757_293_168 },
        "mmHg" => UnitDef { class: Pressure, scale: 133.322_387_415 },
        "inHg" => UnitDef { class: Pressure, scale: 3_386.388_64 },

        // Speed, normalized to meters/second
        "m/s" => UnitDef { class: Speed, scale: 1.0 },
        "km/h" => UnitDef { class: Speed, scale: 1.0 / 3.6 },
        "mph" => UnitDef { class: Speed, scale: 0.447_04 },
        "ft/s" => UnitDef { class: Speed, scale: 0.3048 },
        "kn" => UnitDef { class: Speed, scale: 0.514_444_444 },
        "mm/d" => UnitDef { class: Speed, scale: 0.001 / 86_400.0 },
        "in/d" => UnitDef { class: Speed, scale: 0.0254 / 86_400.0 },

        // Volume, normalized to liters
        "mL" => UnitDef { class: Volume, scale: 0.001 },
        "cm³" => UnitDef { class: Volume, scale: 0.001 },
        "L" => UnitDef { class: Volume, scale: 1.0 },
        "m3" => UnitDef { class: Volume, scale: 1_000.0 },
        "ft³" => UnitDef { class: Volume, scale: 28.316_846_592 },
        "gal" => UnitDef { class: Volume, scale: 3.785_411_784 }, // US liquid gallon
        "fl_oz" => UnitDef { class: Volume, scale: 0.029_573_53 }, // US fluid ounce

        // Unitless / ratio
        "%" => UnitDef { class: Unitless, scale: 1.0 },
        "" => UnitDef { class: Unitless, scale: 1.0 },

        _ => return None,
    };
    Some(def)
}

/// Classify a unit string, if known (spec §2 `unit_class`).
pub fn unit_class(unit: &str) -> Option<UnitClass> {
    if matches!(unit, "°C" | "°F" | "K") {
        return Some(UnitClass::Temperature);
    }
    unit_def(unit).map(|d| d.class)
}

/// Whether `from_unit` can be converted to `to_unit` — same class, both
/// registered (spec §2 `can_convert_units`). Two `None`s are compatible
/// (e.g. statistics with no unit of measurement).
pub fn can_convert(from_unit: Option<&str>, to_unit: Option<&str>) -> bool {
    match (from_unit, to_unit) {
        (None, None) => true,
        (Some(f), Some(t)) => unit_class(f).is_some() && unit_class(f) == unit_class(t),
        _ => false,
    }
}

/// Convert `value` from `from_unit` to `to_unit`. Returns `None` if the
/// units are not in the same class (call [`can_convert`] first to
/// distinguish "incompatible" from "not registered").
pub fn convert(value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
    if from_unit == to_unit {
        return Some(value);
    }
    if unit_class(from_unit) == Some(UnitClass::Temperature)
        && unit_class(to_unit) == Some(UnitClass::Temperature)
    {
        return convert_temperature(value, from_unit, to_unit);
    }
    let from = unit_def(from_unit)?;
    let to = unit_def(to_unit)?;
    if from.class != to.class {
        return None;
    }
    Some(value * from.scale / to.scale)
}

/// Temperature is affine (has an offset), so it cannot share the linear
/// scale table above: 0°C is 32°F, not 0°F.
fn convert_temperature(value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
    let celsius = match from_unit {
        "°C" => value,
        "°F" => (value - 32.0) * 5.0 / 9.0,
        "K" => value - 273.15,
        _ => return None,
    };
    let out = match to_unit {
        "°C" => celsius,
        "°F" => celsius * 9.0 / 5.0 + 32.0,
        "K" => celsius + 273.15,
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_class_converts() {
        assert_eq!(convert(1.0, "km", "m"), Some(1_000.0));
        assert_eq!(convert(1_000.0, "m", "km"), Some(1.0));
    }

    #[test]
    fn cross_class_fails() {
        assert_eq!(convert(1.0, "km", "kg"), None);
    }

    #[test]
    fn temperature_is_affine() {
        let f = convert_temperature(0.0, "°C", "°F").unwrap();
        assert!((f - 32.0).abs() < 1e-9);
        let k = convert_temperature(0.0, "°C", "K").unwrap();
        assert!((k - 273.15).abs() < 1e-9);
    }

    #[test]
    fn can_convert_respects_class() {
        assert!(can_convert(Some("m"), Some("km")));
        assert!(!can_convert(Some("m"), Some("kg")));
        assert!(can_convert(None, None));
        assert!(!can_convert(Some("m"), None));
    }

    #[test]
    fn unit_class_unknown_is_none() {
        assert!(unit_class("bogus-unit").is_none());
    }
}
