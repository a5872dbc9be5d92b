//! Navigation artifacts and package documents: `content.opf`, `toc.ncx`,
//! `nav.xhtml`, `cover.xhtml`, the chapter document skeleton and the
//! variant stylesheets.
//!
//! Every function here is a pure function of the intermediate tree listing
//! plus the metadata, so the Enhanced and Kindle variants can be generated
//! from the same tree without cross-contamination.

use chrono::{DateTime, Utc};

use super::Variant;
use super::chapters::{ChapterMeta, TocEntry};
use super::meta::BookMeta;

/// The fixed `META-INF/container.xml` payload.
pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
    <rootfiles>
        <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
    </rootfiles>
</container>"#;

/// The `mimetype` payload; stored uncompressed as the first archive entry.
pub const MIMETYPE: &str = "application/epub+zip";

/// Escapes text for XML element and attribute content.
#[must_use]
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn media_type_for(file: &str) -> &'static str {
    let ext = file.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "css" => "text/css",
        _ => "application/octet-stream",
    }
}

fn item_id_for(file: &str) -> String {
    let stem: String = file
        .rsplit('/')
        .next()
        .unwrap_or(file)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    stem.trim_matches('-').to_string()
}

/// Builds `content.opf` for one variant.
///
/// `css_files` and `image_files` are the directory listings of
/// `OEBPS/Styles` and `OEBPS/Images`; `cover_image` is the basename of the
/// cover inside `Images/`, when present.
#[must_use]
pub fn build_content_opf(
    meta: &BookMeta,
    chapters: &[ChapterMeta],
    css_files: &[String],
    image_files: &[String],
    cover_image: Option<&str>,
    variant: Variant,
    modified: DateTime<Utc>,
) -> String {
    let mut manifest: Vec<String> = Vec::new();
    let mut spine: Vec<String> = Vec::new();

    manifest.push(
        r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#.to_string(),
    );
    if variant.epub3() {
        manifest.push(
            r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#
                .to_string(),
        );
    }

    if let Some(cover) = cover_image {
        let properties = if variant.epub3() {
            r#" properties="cover-image""#
        } else {
            ""
        };
        manifest.push(format!(
            r#"<item id="cover-image" href="Images/{}" media-type="{}"{properties}/>"#,
            escape_xml(cover),
            media_type_for(cover)
        ));
        manifest.push(
            r#"<item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>"#
                .to_string(),
        );
        spine.push(r#"<itemref idref="cover"/>"#.to_string());
    }

    for chapter in chapters {
        let filename = chapter.xhtml_name();
        let id = item_id_for(&filename);
        manifest.push(format!(
            r#"<item id="{id}" href="{}" media-type="application/xhtml+xml"/>"#,
            escape_xml(&filename)
        ));
        spine.push(format!(r#"<itemref idref="{id}"/>"#));
    }

    for css in css_files {
        manifest.push(format!(
            r#"<item id="css-{}" href="Styles/{}" media-type="text/css"/>"#,
            item_id_for(css),
            escape_xml(css)
        ));
    }

    for image in image_files {
        if cover_image == Some(image.as_str()) {
            continue;
        }
        manifest.push(format!(
            r#"<item id="img-{}" href="Images/{}" media-type="{}"/>"#,
            item_id_for(image),
            escape_xml(image),
            media_type_for(image)
        ));
    }

    let authors_xml: String = meta
        .authors
        .iter()
        .map(|author| {
            let escaped = escape_xml(author);
            format!(
                r#"<dc:creator opf:file-as="{escaped}" opf:role="aut">{escaped}</dc:creator>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let subjects_xml: String = meta
        .subjects
        .iter()
        .map(|subject| format!("<dc:subject>{}</dc:subject>", escape_xml(subject)))
        .collect::<Vec<_>>()
        .join("\n");

    let guide_target = if cover_image.is_some() {
        "cover.xhtml".to_string()
    } else {
        chapters
            .first()
            .map(ChapterMeta::xhtml_name)
            .unwrap_or_default()
    };

    if variant.epub3() {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="bookid" version="3.0">
<metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
<dc:title>{title}</dc:title>
{authors}
<dc:description>{description}</dc:description>
{subjects}
<dc:publisher>{publisher}</dc:publisher>
<dc:rights>{rights}</dc:rights>
<dc:language>en-US</dc:language>
<dc:date>{issued}</dc:date>
<dc:identifier id="bookid">{identifier}</dc:identifier>
<dc:format>application/epub+zip</dc:format>
<meta name="cover" content="{cover_ref}"/>
<meta property="dcterms:modified">{modified}</meta>
</metadata>
<manifest>
{manifest}
</manifest>
<spine toc="ncx">
{spine}
</spine>
<guide><reference href="{guide}" title="Cover" type="cover"/></guide>
</package>"#,
            title = escape_xml(&meta.title),
            authors = authors_xml,
            description = escape_xml(&meta.description),
            subjects = subjects_xml,
            publisher = escape_xml(&meta.publisher),
            rights = escape_xml(&meta.rights),
            issued = escape_xml(&meta.issued),
            identifier = escape_xml(&meta.isbn),
            cover_ref = cover_image.map(|_| "cover-image").unwrap_or_default(),
            modified = modified.format("%Y-%m-%dT%H:%M:%SZ"),
            manifest = manifest.join("\n"),
            spine = spine.join("\n"),
            guide = escape_xml(&guide_target),
        )
    } else {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="BookId" version="2.0">
<metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
<dc:identifier id="BookId" opf:scheme="ISBN">{identifier}</dc:identifier>
<dc:title>{title}</dc:title>
{authors}
<dc:description>{description}</dc:description>
{subjects}
<dc:publisher>{publisher}</dc:publisher>
<dc:rights>{rights}</dc:rights>
<dc:date>{issued}</dc:date>
<dc:language>en</dc:language>
</metadata>
<manifest>
{manifest}
</manifest>
<spine toc="ncx">
{spine}
</spine>
<guide><reference type="cover" title="Cover" href="{guide}"/></guide>
</package>"#,
            identifier = escape_xml(&meta.isbn),
            title = escape_xml(&meta.title),
            authors = authors_xml,
            description = escape_xml(&meta.description),
            subjects = subjects_xml,
            publisher = escape_xml(&meta.publisher),
            rights = escape_xml(&meta.rights),
            issued = escape_xml(&meta.issued),
            manifest = manifest.join("\n"),
            spine = spine.join("\n"),
            guide = escape_xml(&guide_target),
        )
    }
}

/// Builds `toc.ncx` from the TOC tree, falling back to the flat chapter
/// list when the tree is unavailable.
#[must_use]
pub fn build_toc_ncx(
    meta: &BookMeta,
    toc: Option<&[TocEntry]>,
    chapters: &[ChapterMeta],
) -> String {
    let (navmap, depth) = match toc {
        Some(entries) => {
            let mut counter = 0;
            let mut max_depth = 1;
            let navmap = navpoints(entries, &mut counter, &mut max_depth);
            (navmap, max_depth)
        }
        None => {
            let navmap = chapters
                .iter()
                .enumerate()
                .map(|(i, chapter)| {
                    format!(
                        "<navPoint id=\"navPoint-{n}\" playOrder=\"{n}\">\
                         <navLabel><text>{label}</text></navLabel>\
                         <content src=\"{src}\"/></navPoint>",
                        n = i + 1,
                        label = escape_xml(&chapter.title),
                        src = escape_xml(&chapter.xhtml_name()),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            (navmap, 1)
        }
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8" standalone="no" ?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
<head>
<meta content="ID:ISBN:{identifier}" name="dtb:uid"/>
<meta content="{depth}" name="dtb:depth"/>
<meta content="0" name="dtb:totalPageCount"/>
<meta content="0" name="dtb:maxPageNumber"/>
</head>
<docTitle><text>{title}</text></docTitle>
<docAuthor><text>{authors}</text></docAuthor>
<navMap>{navmap}</navMap>
</ncx>"#,
        identifier = escape_xml(&meta.isbn),
        depth = depth,
        title = escape_xml(&meta.title),
        authors = escape_xml(&meta.authors_joined()),
        navmap = navmap,
    )
}

/// Recursive navPoint rendering with global playOrder numbering.
fn navpoints(entries: &[TocEntry], counter: &mut u32, max_depth: &mut u32) -> String {
    let mut out = String::new();
    for entry in entries {
        *counter += 1;
        if entry.depth > *max_depth {
            *max_depth = entry.depth;
        }

        let mut href = entry
            .href
            .rsplit('/')
            .next()
            .unwrap_or(&entry.href)
            .replace(".html", ".xhtml");
        if !entry.fragment.is_empty() {
            href = format!("{href}#{}", entry.fragment);
        }
        let id = if entry.fragment.is_empty() {
            &entry.id
        } else {
            &entry.fragment
        };

        out.push_str(&format!(
            "<navPoint id=\"{id}\" playOrder=\"{order}\">\
             <navLabel><text>{label}</text></navLabel>\
             <content src=\"{href}\"/>",
            id = escape_xml(id),
            order = counter,
            label = escape_xml(&entry.label),
            href = escape_xml(&href),
        ));

        if !entry.children.is_empty() {
            out.push_str(&navpoints(&entry.children, counter, max_depth));
        }
        out.push_str("</navPoint>\n");
    }
    out
}

/// Builds the EPUB 3 navigation document.
#[must_use]
pub fn build_nav_xhtml(chapters: &[ChapterMeta]) -> String {
    let items: String = chapters
        .iter()
        .map(|chapter| {
            format!(
                "<li><a href=\"{}\">{}</a></li>",
                escape_xml(&chapter.xhtml_name()),
                escape_xml(&chapter.title)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
<title>Table of Contents</title>
<style type="text/css">
body {{ font-family: Georgia, serif; margin: 1em; }}
nav {{ margin: 1em 0; }}
ol {{ list-style-type: none; padding-left: 0; }}
li {{ margin: 0.5em 0; }}
a {{ text-decoration: none; color: #0066cc; }}
</style>
</head>
<body>
<nav epub:type="toc" id="toc">
<h1>Table of Contents</h1>
<ol>
{items}
</ol>
</nav>
</body>
</html>"#
    )
}

/// Builds the dedicated cover page referencing an image in `Images/`.
#[must_use]
pub fn build_cover_xhtml(cover_image: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
<title>Cover</title>
<style type="text/css">
body {{ margin: 0; padding: 0; text-align: center; }}
.cover-container {{ display: flex; justify-content: center; align-items: center; min-height: 100vh; width: 100%; }}
.cover-image {{ max-width: 100%; max-height: 100vh; width: auto; height: auto; object-fit: contain; }}
</style>
</head>
<body>
<div class="cover-container">
<img src="Images/{src}" alt="Cover" class="cover-image" />
</div>
</body>
</html>"#,
        src = escape_xml(cover_image)
    )
}

/// Wraps rewritten chapter content in a well-formed XHTML document.
///
/// `inline_css` blocks lifted from the source are embedded in the head;
/// `css_href`, when present, links the chapter's first downloaded
/// stylesheet.
#[must_use]
pub fn chapter_document(
    title: &str,
    inline_css: &[String],
    css_href: Option<&str>,
    body: &str,
) -> String {
    let link = css_href.map_or(String::new(), |href| {
        format!("<link rel=\"stylesheet\" type=\"text/css\" href=\"{href}\"/>\n")
    });

    let styles: String = inline_css
        .iter()
        .map(|css| format!("<style type=\"text/css\">\n{css}\n</style>"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="en" xml:lang="en">
<head>
<title>{title}</title>
{link}{styles}
<style type="text/css">
body {{ margin: 1em; background-color: transparent !important; }}
#sbo-rt-content * {{ text-indent: 0pt !important; }}
#sbo-rt-content .bq {{ margin-right: 1em !important; }}
</style>
</head>
<body>
{body}
</body>
</html>"#,
        title = escape_xml(title),
    )
}

/// The standard reading stylesheet.
pub const STANDARD_CSS: &str = "\
/* Standard reading styles */
body {
    font-family: Georgia, \"Times New Roman\", serif;
    font-size: 1.1em;
    line-height: 1.5;
    margin: 1em;
    color: #333;
    background: #fff;
}

h1, h2, h3, h4, h5, h6 {
    margin-top: 1.5em;
    margin-bottom: 0.6em;
    font-weight: bold;
    color: #000;
    text-align: left;
    line-height: 1.3;
    page-break-after: avoid;
}

h1 {
    font-size: 2em;
    page-break-before: always;
    margin-top: 0;
    padding-top: 1em;
}

h2 { font-size: 1.6em; }
h3 { font-size: 1.3em; }
h4 { font-size: 1.15em; }
h5 { font-size: 1em; font-style: italic; }
h6 { font-size: 0.95em; font-style: italic; }

p {
    margin: 0.8em 0;
    text-align: left;
    text-indent: 0;
    line-height: 1.6;
}

img {
    max-width: 100%;
    height: auto;
    display: block;
    margin: 1em auto;
    page-break-inside: avoid;
}

table {
    width: 100%;
    border-collapse: collapse;
    margin: 1em 0;
    page-break-inside: avoid;
}

th, td {
    padding: 0.5em;
    border: 1px solid #ddd;
    text-align: left;
    vertical-align: top;
}

th {
    font-weight: bold;
    background-color: #f8f8f8;
}

pre, code {
    font-family: \"Monaco\", \"Consolas\", monospace;
    font-size: 0.9em;
    background: #f5f5f5;
    padding: 0.3em 0.5em;
    border-radius: 3px;
}

pre {
    margin: 1em 0;
    padding: 0.8em;
    border: 1px solid #e0e0e0;
    overflow-x: auto;
}

blockquote {
    margin: 1em 2em;
    font-style: italic;
    border-left: 3px solid #ccc;
    padding-left: 1em;
    page-break-inside: avoid;
}

ul, ol {
    margin: 0.5em 0;
    padding-left: 2em;
}

li { margin: 0.3em 0; }

.page-break, .pagebreak {
    page-break-before: always;
    margin: 0;
    padding: 0;
    height: 0;
}

.cover-page {
    text-align: center;
    page-break-after: always;
}

.cover-page img {
    max-height: 90vh;
    max-width: 100%;
    width: auto;
    height: auto;
}

hr {
    border: 0;
    border-top: 1px solid #ddd;
    margin: 1.5em 0;
    page-break-after: avoid;
}
";

/// The Kindle-optimized stylesheet.
pub const KINDLE_CSS: &str = "\
/* Kindle-optimized styles */
body {
    font-family: \"Times New Roman\", serif;
    font-size: 1.2em;
    line-height: 1.6;
    margin: 1em;
    color: #000;
    background: #fff;
}

h1, h2, h3, h4, h5, h6 {
    page-break-after: avoid;
    margin-top: 1.2em;
    margin-bottom: 0.6em;
    font-weight: bold;
    text-align: left;
    line-height: 1.3;
}

h1 {
    font-size: 1.8em;
    page-break-before: always;
    margin-top: 0;
    padding-top: 1em;
}

h2 { font-size: 1.5em; }
h3 { font-size: 1.3em; }
h4 { font-size: 1.1em; }
h5 { font-size: 1em; font-style: italic; }
h6 { font-size: 0.9em; font-style: italic; }

p {
    margin: 0.6em 0;
    text-align: justify;
    text-indent: 0;
    orphans: 2;
    widows: 2;
    line-height: 1.6;
}

img {
    max-width: 100%;
    height: auto;
    display: block;
    margin: 1em auto;
    page-break-inside: avoid;
}

table {
    width: 100%;
    border-collapse: collapse;
    margin: 1em 0;
    page-break-inside: avoid;
}

table, th, td {
    border: 1px solid #000;
}

th, td {
    padding: 0.5em;
    text-align: left;
    vertical-align: top;
}

th {
    font-weight: bold;
    background-color: #f0f0f0;
}

pre, code {
    font-family: \"Courier New\", monospace;
    font-size: 0.9em;
    white-space: pre-wrap;
    word-wrap: break-word;
    page-break-inside: avoid;
    background: #f5f5f5;
    padding: 0.3em 0.5em;
}

pre {
    margin: 1em 0;
    padding: 0.8em;
    border: 1px solid #ddd;
}

blockquote {
    margin: 1em 2em;
    padding-left: 1em;
    border-left: 3px solid #ccc;
    font-style: italic;
    page-break-inside: avoid;
}

ul, ol {
    margin: 0.5em 0;
    padding-left: 2em;
}

li { margin: 0.3em 0; }

.page-break, .pagebreak {
    page-break-before: always;
    margin: 0;
    padding: 0;
    height: 0;
}

.cover-page {
    text-align: center;
    page-break-after: always;
}

.cover-page img {
    max-height: 90vh;
    max-width: 100%;
    width: auto;
    height: auto;
}

hr {
    border: 0;
    border-top: 1px solid #ccc;
    margin: 1.5em 0;
    page-break-after: avoid;
}
";

/// The stylesheet body for a variant.
#[must_use]
pub fn variant_css(variant: Variant) -> &'static str {
    if variant.is_kindle() {
        KINDLE_CSS
    } else {
        STANDARD_CSS
    }
}
