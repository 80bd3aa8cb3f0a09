/// Placeholder replaced by the generated report body.
pub const CONTENT_MARKER: &str = "// QUARRY:CONTENT";

/// Built-in report template.
pub const DEFAULT_TEMPLATE: &str = r##"#set document(title: "Quarry Research Report")
#set page(paper: "a4", margin: (x: 2.2cm, y: 2.5cm), numbering: "1")
#set text(size: 10.5pt)
#set par(justify: true)
#show heading.where(level: 1): set text(size: 18pt)

#let cite-inline(n) = super[[#n]]

#let cite-entry(n, claim, source, url: none) = block(spacing: 0.8em)[
  #text(weight: "bold")[[#n]]
  #claim
  #text(fill: luma(90))[(#source)]
  #if url != none [ #link(url) ]
]

#let conflict-box(topic: "", positions: (), resolution: none) = block(
  width: 100%,
  inset: 10pt,
  radius: 4pt,
  stroke: 0.6pt + rgb("#c0392b"),
  fill: rgb("#fdf2f0"),
)[
  #text(weight: "bold")[Disputed: #topic]
  #for p in positions [
    - *#p.source*: #p.claim
  ]
  #if resolution != none [
    _Resolution:_ #resolution
  ]
]

// QUARRY:CONTENT
"##;
