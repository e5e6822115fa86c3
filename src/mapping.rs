//! EVOK point kind -> Home Assistant entity.

use crate::homeassistant::discovery::{Attributes, Category};

/// Point kinds the gate knows how to expose. Anything else EVOK reports
/// (`neuron`, `wd`, `uart`, ...) is ignored.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PointKind {
    /// Digital input
    Input,
    Relay,
    /// Analog input
    Ai,
    /// Analog output, 0-10V
    Ao,
    /// User LED
    Led,
    /// 1-Wire temperature sensor
    Temp,
}

impl PointKind {
    pub const ALL: [PointKind; 6] = [
        PointKind::Input,
        PointKind::Relay,
        PointKind::Ai,
        PointKind::Ao,
        PointKind::Led,
        PointKind::Temp,
    ];

    /// Parse the EVOK `dev` field.
    pub fn from_dev(dev: &str) -> Option<Self> {
        Some(match dev {
            "input" => PointKind::Input,
            "relay" => PointKind::Relay,
            "ai" => PointKind::Ai,
            "ao" => PointKind::Ao,
            "led" => PointKind::Led,
            "temp" => PointKind::Temp,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PointKind::Input => "input",
            PointKind::Relay => "relay",
            PointKind::Ai => "ai",
            PointKind::Ao => "ao",
            PointKind::Led => "led",
            PointKind::Temp => "temp",
        }
    }

    /// Kinds HA can set. Their stored value follows commands optimistically.
    pub fn is_actuator(&self) -> bool {
        matches!(self, PointKind::Relay | PointKind::Ao | PointKind::Led)
    }

    pub fn mapping(&self) -> Mapping {
        match self {
            PointKind::Input => Mapping {
                category: Category::BinarySensor,
                attributes: Attributes {
                    initial_state: Some("0"),
                    ..Attributes::on_off()
                },
            },
            PointKind::Relay | PointKind::Led => Mapping {
                category: Category::Switch,
                attributes: Attributes::on_off(),
            },
            PointKind::Ai => Mapping {
                category: Category::Sensor,
                attributes: Attributes::measurement("voltage", "V"),
            },
            PointKind::Ao => Mapping {
                category: Category::Number,
                attributes: Attributes {
                    min: Some(0.0),
                    max: Some(10.0),
                    step: Some(0.1),
                    ..Attributes::measurement("voltage", "V")
                },
            },
            PointKind::Temp => Mapping {
                category: Category::Sensor,
                attributes: Attributes::measurement("temperature", "°C"),
            },
        }
    }
}

/// How a point is registered in HA.
#[derive(Clone, Debug, PartialEq)]
pub struct Mapping {
    pub category: Category,
    pub attributes: Attributes,
}

/// Resolve an EVOK `dev` string. `None` means: ignore this point.
pub fn lookup(dev: &str) -> Option<(PointKind, Mapping)> {
    let kind = PointKind::from_dev(dev)?;
    Some((kind, kind.mapping()))
}
