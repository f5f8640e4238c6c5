//! Assembles joined tracts and a color scale into a renderable map.

use crate::colorscale::{Color, ColorScale, LegendStop, Palette};
use crate::types::{AttributeValue, JoinedTract};
use geo::Centroid;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feature property holding the canonical tract id.
pub const ID_PROPERTY: &str = "GEOID";
/// Feature property holding the precomputed fill color.
pub const FILL_PROPERTY: &str = "fill";

pub const DEFAULT_ZOOM: u8 = 7;
const LEGEND_STOPS: usize = 9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComposeError {
    #[error("no tract has a usable geometry")]
    NoFeatures,
    #[error("field {0:?} is not a tract attribute")]
    UnknownField(String),
    #[error("{name} must be within [0, 1], got {value}")]
    InvalidOpacity { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TooltipField {
    pub field: String,
    pub label: String,
}

impl TooltipField {
    fn new(field: &str, label: &str) -> Self {
        Self {
            field: field.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileProvider {
    #[default]
    CartodbPositron,
    OpenStreetMap,
}

impl TileProvider {
    pub fn name(&self) -> &'static str {
        match self {
            TileProvider::CartodbPositron => "CartoDB Positron",
            TileProvider::OpenStreetMap => "OpenStreetMap",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            TileProvider::CartodbPositron => {
                "https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png"
            }
            TileProvider::OpenStreetMap => "https://tile.openstreetmap.org/{z}/{x}/{y}.png",
        }
    }

    pub fn attribution(&self) -> &'static str {
        match self {
            TileProvider::CartodbPositron => {
                "&copy; OpenStreetMap contributors &copy; CARTO"
            }
            TileProvider::OpenStreetMap => "&copy; OpenStreetMap contributors",
        }
    }
}

/// Styling threaded into [`compose`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapStyle {
    pub fill_opacity: f64,
    pub outline_opacity: f64,
    pub palette: Palette,
    pub legend_label: String,
    pub tooltip_fields: Vec<TooltipField>,
    pub default_zoom: u8,
    pub tiles: TileProvider,
    pub no_data_color: Color,
}

impl Default for MapStyle {
    fn default() -> Self {
        Self {
            fill_opacity: 0.7,
            outline_opacity: 0.2,
            palette: Palette::YlGnBu,
            legend_label: "National Walkability Index".to_string(),
            tooltip_fields: vec![
                TooltipField::new(ID_PROPERTY, "Tract ID:"),
                TooltipField::new("NatWalkInd", "Walkability Index:"),
                TooltipField::new("TotPop", "Total Population:"),
                TooltipField::new("TotEmp", "Total Employment:"),
                TooltipField::new("D1A", "Density (D1A):"),
            ],
            default_zoom: DEFAULT_ZOOM,
            tiles: TileProvider::default(),
            no_data_color: Color::GRAY,
        }
    }
}

impl MapStyle {
    fn validate(&self) -> Result<(), ComposeError> {
        for (name, value) in [
            ("fill_opacity", self.fill_opacity),
            ("outline_opacity", self.outline_opacity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ComposeError::InvalidOpacity { name, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStyle {
    pub color: Color,
    pub weight: f64,
    pub opacity: f64,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tooltip {
    pub fields: Vec<TooltipField>,
    pub localize: bool,
    pub sticky: bool,
    pub style: String,
}

/// Map layers, bottom to top in [`MapArtifact::layers`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    BaseTiles {
        name: String,
        url: String,
        attribution: String,
    },
    Choropleth {
        metric: String,
        fill_property: String,
        fill_opacity: f64,
        line_opacity: f64,
        line_color: Color,
        line_weight: f64,
    },
    Legend {
        caption: String,
        min: f64,
        max: f64,
        stops: Vec<LegendStop>,
        no_data: Color,
    },
    Outline {
        name: String,
        style: PathStyle,
        highlight: PathStyle,
        tooltip: Tooltip,
    },
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::BaseTiles { .. } => "base_tiles",
            Layer::Choropleth { .. } => "choropleth",
            Layer::Legend { .. } => "legend",
            Layer::Outline { .. } => "outline",
        }
    }
}

/// A complete map description. The feature collection is shared by the
/// choropleth and outline layers.
#[derive(Debug, Clone, Serialize)]
pub struct MapArtifact {
    /// (lat, lon)
    pub center: [f64; 2],
    pub zoom: u8,
    pub features: FeatureCollection,
    pub layers: Vec<Layer>,
}

fn json_value(value: Option<&AttributeValue>) -> JsonValue {
    match value {
        Some(AttributeValue::Number(n)) => serde_json::Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Some(AttributeValue::Text(s)) => JsonValue::String(s.clone()),
        None => JsonValue::Null,
    }
}

fn feature_for(
    tract: &JoinedTract,
    metric: &str,
    scale: &ColorScale,
    fields: &[TooltipField],
) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert(ID_PROPERTY.to_string(), JsonValue::String(tract.id.to_string()));
    properties.insert(metric.to_string(), json_value(tract.value(metric)));
    for f in fields.iter().filter(|f| f.field != ID_PROPERTY) {
        properties.insert(f.field.clone(), json_value(tract.value(&f.field)));
    }
    properties.insert(
        FILL_PROPERTY.to_string(),
        JsonValue::String(scale.color_for(tract.metric(metric)).to_string()),
    );

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(&tract.geometry))),
        id: Some(geojson::feature::Id::String(tract.id.to_string())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Mean of the per-tract centroids as (lat, lon).
fn center_of(tracts: &[JoinedTract]) -> Option<[f64; 2]> {
    let (sum_x, sum_y, n) = tracts
        .iter()
        .filter_map(|t| t.geometry.centroid())
        .fold((0.0, 0.0, 0usize), |(x, y, n), c| (x + c.x(), y + c.y(), n + 1));
    (n > 0).then(|| [sum_y / n as f64, sum_x / n as f64])
}

pub fn compose(
    tracts: &[JoinedTract],
    scale: &ColorScale,
    metric: &str,
    style: &MapStyle,
) -> Result<MapArtifact, ComposeError> {
    style.validate()?;
    let center = center_of(tracts).ok_or(ComposeError::NoFeatures)?;

    // Every tract carries the same column set after the join
    let columns = &tracts[0].attributes;
    for field in std::iter::once(metric).chain(style.tooltip_fields.iter().map(|f| f.field.as_str())) {
        if field != ID_PROPERTY && !columns.contains_key(field) {
            return Err(ComposeError::UnknownField(field.to_string()));
        }
    }

    let features = FeatureCollection {
        bbox: None,
        features: tracts
            .iter()
            .filter(|t| !t.geometry.0.is_empty())
            .map(|t| feature_for(t, metric, scale, &style.tooltip_fields))
            .collect(),
        foreign_members: None,
    };

    let (min, max) = scale.range();
    let layers = vec![
        Layer::BaseTiles {
            name: style.tiles.name().to_string(),
            url: style.tiles.url().to_string(),
            attribution: style.tiles.attribution().to_string(),
        },
        Layer::Choropleth {
            metric: metric.to_string(),
            fill_property: FILL_PROPERTY.to_string(),
            fill_opacity: style.fill_opacity,
            line_opacity: style.outline_opacity,
            line_color: Color::new(0, 0, 0),
            line_weight: 1.0,
        },
        Layer::Legend {
            caption: style.legend_label.clone(),
            min,
            max,
            stops: scale.legend_stops(LEGEND_STOPS),
            no_data: scale.no_data(),
        },
        Layer::Outline {
            name: "Census Tracts".to_string(),
            style: PathStyle {
                color: Color::new(0, 0, 0),
                weight: 0.3,
                opacity: 1.0,
                fill_opacity: 0.0,
            },
            highlight: PathStyle {
                color: Color::new(0, 0, 255),
                weight: 1.0,
                opacity: 1.0,
                fill_opacity: 0.1,
            },
            tooltip: Tooltip {
                fields: style.tooltip_fields.clone(),
                localize: true,
                sticky: false,
                style: "background-color: white; color: #333333; font-family: Arial; \
                        font-size: 12px; padding: 6px;"
                    .to_string(),
            },
        },
    ];

    Ok(MapArtifact {
        center,
        zoom: style.default_zoom,
        features,
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attributes, CanonicalId};
    use geo::{polygon, MultiPolygon};

    fn tract(id: &str, x: f64, y: f64, walk: Option<f64>) -> JoinedTract {
        let mut attributes = Attributes::new();
        for column in ["NatWalkInd", "TotPop", "TotEmp", "D1A"] {
            attributes.insert(column.to_string(), None);
        }
        attributes.insert("NatWalkInd".to_string(), walk.map(AttributeValue::Number));
        JoinedTract {
            id: CanonicalId(id.to_string()),
            geometry: MultiPolygon::new(vec![polygon![
                (x: x, y: y),
                (x: x + 2.0, y: y),
                (x: x + 2.0, y: y + 2.0),
                (x: x, y: y + 2.0),
                (x: x, y: y),
            ]]),
            matched: walk.is_some(),
            attributes,
        }
    }

    fn fixture() -> (Vec<JoinedTract>, ColorScale) {
        let tracts = vec![
            tract("53001950100", -122.0, 47.0, Some(5.0)),
            tract("53001950200", -120.0, 45.0, Some(15.0)),
            tract("53001950300", -124.0, 46.0, None),
        ];
        let scale = ColorScale::from_values(
            tracts.iter().map(|t| t.metric("NatWalkInd")),
            Palette::YlGnBu,
            Color::GRAY,
        )
        .unwrap();
        (tracts, scale)
    }

    #[test]
    fn layers_are_stacked_in_order() {
        let (tracts, scale) = fixture();
        let map = compose(&tracts, &scale, "NatWalkInd", &MapStyle::default()).unwrap();

        let kinds: Vec<&str> = map.layers.iter().map(Layer::kind).collect();
        assert_eq!(kinds, ["base_tiles", "choropleth", "legend", "outline"]);
        assert_eq!(map.zoom, DEFAULT_ZOOM);
        assert_eq!(map.features.features.len(), 3);
    }

    #[test]
    fn center_is_mean_of_centroids() {
        let (tracts, scale) = fixture();
        let map = compose(&tracts, &scale, "NatWalkInd", &MapStyle::default()).unwrap();
        // centroids: (-121, 48), (-119, 46), (-123, 47)
        assert!((map.center[0] - 47.0).abs() < 1e-9);
        assert!((map.center[1] - -121.0).abs() < 1e-9);
    }

    #[test]
    fn features_carry_fill_and_explicit_nulls() {
        let (tracts, scale) = fixture();
        let map = compose(&tracts, &scale, "NatWalkInd", &MapStyle::default()).unwrap();

        let props = map.features.features[2].properties.as_ref().unwrap();
        assert_eq!(props[ID_PROPERTY], "53001950300");
        assert_eq!(props["NatWalkInd"], JsonValue::Null);
        assert_eq!(props["TotPop"], JsonValue::Null);
        assert_eq!(props[FILL_PROPERTY], Color::GRAY.to_string());

        let first = map.features.features[0].properties.as_ref().unwrap();
        assert_eq!(first["NatWalkInd"], 5.0);
        assert_eq!(first[FILL_PROPERTY], Palette::YlGnBu.evaluate(0.0).to_string());
    }

    #[test]
    fn legend_is_bound_to_the_scale() {
        let (tracts, scale) = fixture();
        let style = MapStyle {
            legend_label: "Walkability".to_string(),
            ..MapStyle::default()
        };
        let map = compose(&tracts, &scale, "NatWalkInd", &style).unwrap();
        match &map.layers[2] {
            Layer::Legend { caption, min, max, stops, .. } => {
                assert_eq!(caption, "Walkability");
                assert_eq!((*min, *max), (5.0, 15.0));
                assert_eq!(stops.len(), LEGEND_STOPS);
            }
            other => panic!("expected legend, got {:?}", other),
        }
    }

    #[test]
    fn tooltip_fields_keep_their_order() {
        let (tracts, scale) = fixture();
        let map = compose(&tracts, &scale, "NatWalkInd", &MapStyle::default()).unwrap();
        let Layer::Outline { tooltip, .. } = &map.layers[3] else {
            panic!("expected outline layer");
        };
        let labels: Vec<&str> = tooltip.fields.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(
            labels,
            ["Tract ID:", "Walkability Index:", "Total Population:", "Total Employment:", "Density (D1A):"]
        );
    }

    #[test]
    fn rejects_bad_input() {
        let (tracts, scale) = fixture();
        assert_eq!(
            compose(&[], &scale, "NatWalkInd", &MapStyle::default()).unwrap_err(),
            ComposeError::NoFeatures
        );
        assert_eq!(
            compose(&tracts, &scale, "Missing", &MapStyle::default()).unwrap_err(),
            ComposeError::UnknownField("Missing".to_string())
        );
        let style = MapStyle {
            fill_opacity: 1.5,
            ..MapStyle::default()
        };
        assert!(matches!(
            compose(&tracts, &scale, "NatWalkInd", &style),
            Err(ComposeError::InvalidOpacity { name: "fill_opacity", .. })
        ));
    }

    #[test]
    fn inputs_are_not_mutated() {
        let (tracts, scale) = fixture();
        let before = tracts.clone();
        let _ = compose(&tracts, &scale, "NatWalkInd", &MapStyle::default()).unwrap();
        for (a, b) in before.iter().zip(&tracts) {
            assert_eq!(a.geometry, b.geometry);
            assert_eq!(a.attributes, b.attributes);
        }
    }
}
