use crate::compose::MapArtifact;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";

// Draws a serialized MapArtifact. Layers are added in artifact order.
const SCRIPT: &str = r#"
const artifact = __ARTIFACT__;
const map = L.map('map').setView(artifact.center, artifact.zoom);

function escapeHtml(value) {
  return String(value)
    .replace(/&/g, '&amp;')
    .replace(/</g, '&lt;')
    .replace(/>/g, '&gt;')
    .replace(/"/g, '&quot;')
    .replace(/'/g, '&#39;');
}

// Returns markup-safe text
function fmt(value, localize) {
  if (value === null || value === undefined) return 'No data';
  if (localize && typeof value === 'number') return escapeHtml(value.toLocaleString());
  return escapeHtml(value);
}

for (const layer of artifact.layers) {
  switch (layer.type) {
    case 'base_tiles':
      L.tileLayer(layer.url, { attribution: layer.attribution, subdomains: 'abcd', maxZoom: 19 }).addTo(map);
      break;
    case 'choropleth':
      L.geoJSON(artifact.features, {
        style: f => ({
          fillColor: f.properties[layer.fill_property],
          fillOpacity: layer.fill_opacity,
          color: layer.line_color,
          opacity: layer.line_opacity,
          weight: layer.line_weight,
        }),
      }).addTo(map);
      break;
    case 'legend': {
      const legend = L.control({ position: 'topright' });
      legend.onAdd = () => {
        const div = L.DomUtil.create('div', 'legend');
        const n = layer.stops.length - 1;
        const gradient = layer.stops
          .map((s, i) => `${escapeHtml(s.color)} ${(100 * i / Math.max(n, 1)).toFixed(1)}%`)
          .join(', ');
        div.innerHTML =
          `<div class="caption">${escapeHtml(layer.caption)}</div>` +
          `<div class="bar" style="background: linear-gradient(to right, ${gradient})"></div>` +
          `<div class="ticks"><span>${fmt(layer.min, true)}</span><span>${fmt(layer.max, true)}</span></div>` +
          `<div><span class="swatch" style="background: ${escapeHtml(layer.no_data)}"></span>No data</div>`;
        return div;
      };
      legend.addTo(map);
      break;
    }
    case 'outline': {
      const tip = layer.tooltip;
      const group = L.geoJSON(artifact.features, {
        style: () => ({
          color: layer.style.color,
          weight: layer.style.weight,
          opacity: layer.style.opacity,
          fillOpacity: layer.style.fill_opacity,
        }),
        onEachFeature: (f, l) => {
          const rows = tip.fields
            .map(t => `<tr><th>${escapeHtml(t.label)}</th><td>${fmt(f.properties[t.field], tip.localize)}</td></tr>`)
            .join('');
          l.bindTooltip(`<table>${rows}</table>`, { sticky: tip.sticky, className: 'tract-tooltip' });
          l.on('mouseover', () => l.setStyle({
            color: layer.highlight.color,
            weight: layer.highlight.weight,
            fillOpacity: layer.highlight.fill_opacity,
          }));
          l.on('mouseout', () => group.resetStyle(l));
        },
      }).addTo(map);
      break;
    }
  }
}
"#;

fn tooltip_css(artifact: &MapArtifact) -> &str {
    artifact
        .layers
        .iter()
        .find_map(|layer| match layer {
            crate::compose::Layer::Outline { tooltip, .. } => Some(tooltip.style.as_str()),
            _ => None,
        })
        .unwrap_or("")
}

/// Renders the artifact as a standalone HTML page.
pub fn to_html(artifact: &MapArtifact, title: &str) -> Result<String> {
    let json = serde_json::to_string(artifact).context("Failed to serialize map artifact")?;
    // Keep the payload from closing the script element early. `\u003c` is
    // read back as `<` by the JSON literal.
    let json = json.replace('<', "\\u003c");
    let title = title
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<link rel="stylesheet" href="{css}">
<script src="{js}"></script>
<style>
html, body, #map {{ height: 100%; margin: 0; }}
.legend {{ background: white; padding: 6px 8px; font: 12px Arial, sans-serif; border-radius: 4px; }}
.legend .bar {{ width: 220px; height: 10px; }}
.legend .ticks {{ display: flex; justify-content: space-between; }}
.legend .swatch {{ display: inline-block; width: 10px; height: 10px; margin-right: 4px; }}
.tract-tooltip {{ {tooltip} }}
.tract-tooltip th {{ text-align: left; padding-right: 6px; }}
</style>
</head>
<body>
<div id="map"></div>
<script>{script}</script>
</body>
</html>
"#,
        title = title,
        css = LEAFLET_CSS,
        js = LEAFLET_JS,
        tooltip = tooltip_css(artifact),
        script = SCRIPT.replace("__ARTIFACT__", &json),
    ))
}

pub fn write_html(artifact: &MapArtifact, title: &str, path: &Path) -> Result<()> {
    let html = to_html(artifact, title)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(path, html).with_context(|| format!("Failed to write map: {:?}", path))?;
    Ok(())
}
