//! The form page, bundled into the binary.

pub const INDEX_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Study Area Map Generator</title>
  <style>
    body { font-family: system-ui, sans-serif; max-width: 760px; margin: 2rem auto; padding: 0 1rem; color: #1f2933; }
    h1 { font-size: 1.6rem; }
    h2 { font-size: 1.05rem; margin-top: 1.6rem; }
    label { display: block; margin: 0.8rem 0 0.3rem; font-weight: 600; }
    textarea, input, select { width: 100%; box-sizing: border-box; padding: 0.45rem; font: inherit; }
    textarea { min-height: 6rem; font-family: ui-monospace, monospace; }
    button, a.button { display: inline-block; margin-top: 1rem; padding: 0.55rem 1.1rem; border: 0; border-radius: 4px;
      background: #2f855a; color: #fff; font: inherit; text-decoration: none; cursor: pointer; }
    a.button[aria-disabled="true"] { background: #a0aec0; pointer-events: none; }
    #error { display: none; margin-top: 1rem; padding: 0.7rem; border-radius: 4px; background: #fed7d7; color: #742a2a; white-space: pre-wrap; }
    #figure { margin-top: 1.2rem; max-width: 100%; border: 1px solid #e2e8f0; }
    .hidden { display: none; }
  </style>
</head>
<body>
  <h1>Study Area Map Generator (With PNG Export)</h1>

  <h2>Optional: Paste Custom Polygon Coordinates (Overrides Dropdown Selection)</h2>
  <label for="coordinates">Enter Coordinates as GeoJSON-style List (e.g., [[lon, lat], [lon, lat], ...])</label>
  <textarea id="coordinates" spellcheck="false"></textarea>

  <div id="custom-name" class="hidden">
    <label for="name">Enter the Name of This Area (e.g., Miyuga Site, Forest Block 3)</label>
    <input id="name" value="Custom Area" />
  </div>

  <div id="selection">
    <label for="level">Select Level of Study Area</label>
    <select id="level"></select>
    <label for="area" id="area-label">Select Area</label>
    <select id="area"></select>
  </div>

  <button id="generate" type="button">Generate Map</button>
  <a id="download" class="button" aria-disabled="true" href="#">&#128229; Download Map as PNG</a>

  <div id="error"></div>
  <img id="figure" class="hidden" alt="Study area map" />

  <script>
    const $ = (id) => document.getElementById(id);

    function showError(message) {
      const box = $('error');
      box.textContent = message;
      box.style.display = message ? 'block' : 'none';
    }

    async function failure(response) {
      try {
        const body = await response.json();
        let text = body.error || response.statusText;
        if (body.available_fields) {
          text += '\nAvailable columns: ' + body.available_fields.join(', ');
        }
        return text;
      } catch (_) {
        return response.statusText;
      }
    }

    function query() {
      const params = new URLSearchParams();
      const coordinates = $('coordinates').value;
      if (coordinates.trim()) {
        params.set('coordinates', coordinates);
        params.set('name', $('name').value);
      } else {
        params.set('level', $('level').value);
        params.set('area', $('area').value);
      }
      return params.toString();
    }

    function toggleCustom() {
      const custom = $('coordinates').value.trim() !== '';
      $('custom-name').classList.toggle('hidden', !custom);
      $('selection').classList.toggle('hidden', custom);
    }

    async function loadAreas() {
      const level = $('level').value;
      $('area-label').textContent = 'Select ' + level;
      $('area').innerHTML = '';
      const response = await fetch('/api/areas?level=' + encodeURIComponent(level));
      if (!response.ok) {
        showError(await failure(response));
        return;
      }
      showError('');
      const body = await response.json();
      for (const name of body.areas) {
        $('area').add(new Option(name, name));
      }
    }

    async function loadLevels() {
      const response = await fetch('/api/levels');
      const levels = await response.json();
      for (const level of levels) {
        $('level').add(new Option(level.name, level.name));
      }
      await loadAreas();
    }

    async function generate() {
      const params = query();
      const download = $('download');
      download.setAttribute('aria-disabled', 'true');
      const response = await fetch('/api/map?' + params);
      if (!response.ok) {
        $('figure').classList.add('hidden');
        showError(await failure(response));
        return;
      }
      showError('');
      const blob = await response.blob();
      const figure = $('figure');
      if (figure.src) URL.revokeObjectURL(figure.src);
      figure.src = URL.createObjectURL(blob);
      figure.classList.remove('hidden');
      download.href = '/api/map/download?' + params;
      download.setAttribute('aria-disabled', 'false');
    }

    $('coordinates').addEventListener('input', toggleCustom);
    $('level').addEventListener('change', loadAreas);
    $('generate').addEventListener('click', generate);
    loadLevels().catch((e) => showError(String(e)));
  </script>
</body>
</html>
"##;
