use chrono::NaiveDate;

const ENRICHMENT_PROMPT: &str = r#"You are a railway data analyst for the Spanish rail network (Adif/Renfe) with GIS experience. Convert one natural-language incident notice into a structured JSON object that can be placed on a map automatically.

OUTPUT SCHEMA (return exactly one JSON object with these keys):
- "id": null
- "summary": very short summary in Spanish, at most 60 characters
- "description": the full incident text
- "network": one of CERCANIAS_MADRID, CERCANIAS_VALENCIA, RODALIES_CATALUNYA, ALTA_VELOCIDAD, MEDIA_DISTANCIA, ANCHO_METRICO, OTROS
- "line_affected": line identifier as written (e.g. "C4", "R1", "R2 Sud"), or null
- "location_type": one of STATION, SEGMENT, LINE, AREA
- "nodes": list of key station names
    - for SEGMENT, [origin, destination] from the pattern "entre X y Y"
    - normalize names (e.g. "Valencia Nord" -> "VALENCIA-ESTACIO DEL NORD")
- "status": RED (service cut), YELLOW (delays), BLUE (works or alternative plan), GREEN (resolved)
- "cause_category": one of OBRAS, ACCIDENTE, METEO, INFRAESTRUCTURA, OTROS
- "severity_level": integer 1 to 5
- "start_date": ISO date (YYYY-MM-DD). "desde hoy" means today's date.
- "end_date": expected end date (ISO) if the text gives one, otherwise null
- "is_active": true if the incident is still in effect or is scheduled work in the future
- "transport_backup": true if the text mentions "transbordo", "autobús" or "plan alternativo"

RULES:
1. Network
   - Lines prefixed "C" (C3, C4, C9) are CERCANIAS; pick the hub from the city mentioned.
   - Lines prefixed "R" (R1, R2, R4) are RODALIES_CATALUNYA.
2. Geometry
   - "entre [station A] y [station B]" is always SEGMENT.
   - A whole line with no section mentioned is LINE.
3. Severity
   - 5: accidents on high-speed lines, or total cuts from storms or weather.
   - 4: total cuts on Cercanías/Rodalies lines with a replacement transfer.
   - 3: scheduled works affecting service.
   - 2: occasional delays.
   - 1: resolved or informational notices.

Respond with the JSON object only. No explanations, no markdown. Use null for anything you cannot extract."#;

/// Full prompt for one incident text. `today` resolves relative dates such
/// as "desde hoy".
pub fn build_prompt(raw_text: &str, today: NaiveDate) -> String {
    format!(
        "{ENRICHMENT_PROMPT}\n\nToday's date: {}\n\nIncidencia: {raw_text}",
        today.format("%Y-%m-%d")
    )
}
