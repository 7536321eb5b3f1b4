//! Page layout for the diagnosis report.
//!
//! Pure and deterministic: the same result, customer name and image sizes
//! always produce the same pages. A cursor tracks the next baseline on the
//! current page and breaks explicitly before anything would cross into the
//! footer band, which is reserved on every page.

use uuid::Uuid;

use super::text::{sanitize, text_width, wrap, Face};
use crate::models::{format_yen, AssessmentResult, MAX_SEVERITY};

pub const TITLE: &str = "Rain Leak Diagnosis Report";
pub const NO_DAMAGE_HEADING: &str = "No damage detected";
pub const PHOTOS_HEADING: &str = "Uploaded photos";

/// Headings of the full (damage found) branch, in order.
pub const DAMAGE_SECTIONS: [&str; 6] = [
    "Damage locations",
    "Damage details",
    "Estimated repair cost",
    "First-aid cost",
    "Insurance likelihood",
    "Recommended plan",
];

pub const TITLE_SIZE: f32 = 24.0;
pub const HEADING_SIZE: f32 = 16.0;
pub const BODY_SIZE: f32 = 12.0;
pub const SEVERITY_SIZE: f32 = 36.0;
pub const FOOTER_SIZE: f32 = 10.0;

const LINE_SPACING: f32 = 1.4;
const SECTION_GAP: f32 = 14.0;
const FOOTER_PAD: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color(pub f32, pub f32, pub f32);

const ACCENT: Color = Color(0.145, 0.388, 0.922);
const INK: Color = Color(0.0, 0.0, 0.0);
const BODY: Color = Color(0.2, 0.2, 0.2);
const MUTED: Color = Color(0.4, 0.4, 0.4);

/// Page and grid dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub footer_height: f32,
    pub cell: f32,
    pub cell_gap: f32,
    pub per_row: usize,
}

impl Geometry {
    /// A4 portrait, 50 pt margins, 3 × 150 pt photo cells.
    pub fn a4() -> Self {
        Self {
            page_width: 595.28,
            page_height: 841.89,
            margin: 50.0,
            footer_height: 3.0 * line_height(FOOTER_SIZE) + FOOTER_PAD,
            cell: 150.0,
            cell_gap: 20.0,
            per_row: 3,
        }
    }

    pub fn content_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin
    }

    pub fn top(&self) -> f32 {
        self.page_height - self.margin
    }

    /// Lowest point body content may reach.
    pub fn content_bottom(&self) -> f32 {
        self.margin + self.footer_height
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::a4()
    }
}

pub fn line_height(size: f32) -> f32 {
    size * LINE_SPACING
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Branding {
    pub organization: String,
    pub brand: String,
    pub contact: String,
}

impl Branding {
    fn lines(&self) -> impl Iterator<Item = &str> {
        [&self.organization, &self.brand, &self.contact]
            .into_iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// Everything the layout depends on.
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub session_id: Uuid,
    pub customer_name: &'a str,
    pub result: &'a AssessmentResult,
    /// Pixel sizes of the images that were fetched and decoded, in order
    pub images: &'a [(u32, u32)],
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// `y` is the baseline
    Text {
        x: f32,
        y: f32,
        face: Face,
        size: f32,
        color: Color,
        text: String,
    },
    /// `index` points into the decoded image list; `(x, y)` is the lower-left corner
    Image {
        index: usize,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub elements: Vec<Element>,
}

/// Structural summary of a report, independent of positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutlineItem {
    Heading(String),
    Text(String),
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub geometry: Geometry,
    pub pages: Vec<Page>,
    outline: Vec<OutlineItem>,
}

impl Layout {
    pub fn outline(&self) -> &[OutlineItem] {
        &self.outline
    }

    pub fn headings(&self) -> Vec<&str> {
        self.outline
            .iter()
            .filter_map(|item| match item {
                OutlineItem::Heading(h) => Some(h.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn images_placed(&self) -> usize {
        self.outline
            .iter()
            .filter(|item| matches!(item, OutlineItem::Image))
            .count()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

#[derive(Clone, Copy)]
enum Align {
    Left,
    Center,
}

struct Cursor {
    geometry: Geometry,
    done: Vec<Page>,
    current: Page,
    y: f32,
    outline: Vec<OutlineItem>,
}

impl Cursor {
    fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            done: Vec::new(),
            current: Page::default(),
            y: geometry.top(),
            outline: Vec::new(),
        }
    }

    fn new_page(&mut self) {
        self.done.push(std::mem::take(&mut self.current));
        self.y = self.geometry.top();
    }

    fn at_page_top(&self) -> bool {
        self.current.elements.is_empty()
    }

    /// Break unless `height` still fits above the footer band.
    fn ensure(&mut self, height: f32) {
        if self.y - height < self.geometry.content_bottom() && !self.at_page_top() {
            self.new_page();
        }
    }

    fn gap(&mut self, height: f32) {
        if !self.at_page_top() {
            self.y -= height;
        }
    }

    fn line(&mut self, text: &str, face: Face, size: f32, color: Color, align: Align) {
        self.ensure(line_height(size));
        let x = match align {
            Align::Left => self.geometry.margin,
            Align::Center => (self.geometry.page_width - text_width(text, face, size)) / 2.0,
        };
        self.current.elements.push(Element::Text {
            x,
            y: self.y - size,
            face,
            size,
            color,
            text: text.to_string(),
        });
        self.y -= line_height(size);
    }

    /// Heading kept together with the first line that follows it.
    fn heading(&mut self, text: &str) {
        self.gap(SECTION_GAP);
        self.ensure(line_height(HEADING_SIZE) + line_height(BODY_SIZE));
        let text = sanitize(text);
        self.outline.push(OutlineItem::Heading(text.clone()));
        self.line(&text, Face::Bold, HEADING_SIZE, INK, Align::Left);
    }

    fn paragraph(&mut self, text: &str, face: Face, size: f32, color: Color) {
        let text = sanitize(text);
        let width = self.geometry.content_width();
        for line in wrap(&text, face, size, width) {
            self.line(&line, face, size, color, Align::Left);
        }
        self.outline.push(OutlineItem::Text(text));
    }

    fn section(&mut self, heading: &str, body: &str) {
        self.heading(heading);
        self.paragraph(body, Face::Regular, BODY_SIZE, BODY);
    }

    fn photo_grid(&mut self, images: &[(u32, u32)]) {
        let g = self.geometry;
        let grid_width = g.per_row as f32 * g.cell + (g.per_row as f32 - 1.0) * g.cell_gap;
        let left = g.margin + (g.content_width() - grid_width).max(0.0) / 2.0;

        for (row_index, row) in images.chunks(g.per_row.max(1)).enumerate() {
            self.ensure(g.cell);
            let top = self.y;
            for (col, &(w, h)) in row.iter().enumerate() {
                let (w, h) = (w.max(1) as f32, h.max(1) as f32);
                let scale = (g.cell / w).min(g.cell / h);
                let (width, height) = (w * scale, h * scale);
                let cell_x = left + col as f32 * (g.cell + g.cell_gap);
                self.current.elements.push(Element::Image {
                    index: row_index * g.per_row + col,
                    x: cell_x + (g.cell - width) / 2.0,
                    y: top - g.cell + (g.cell - height) / 2.0,
                    width,
                    height,
                });
                self.outline.push(OutlineItem::Image);
            }
            self.y = top - g.cell - g.cell_gap;
        }
    }

    fn finish(mut self, branding: &Branding) -> Layout {
        let g = self.geometry;
        let mut y = g.margin + g.footer_height - FOOTER_PAD - FOOTER_SIZE;
        for line in branding.lines() {
            let text = sanitize(line);
            self.current.elements.push(Element::Text {
                x: (g.page_width - text_width(&text, Face::Regular, FOOTER_SIZE)) / 2.0,
                y,
                face: Face::Regular,
                size: FOOTER_SIZE,
                color: MUTED,
                text: text.clone(),
            });
            self.outline.push(OutlineItem::Text(text));
            y -= line_height(FOOTER_SIZE);
        }

        self.done.push(self.current);
        Layout {
            geometry: g,
            pages: self.done,
            outline: self.outline,
        }
    }
}

/// Lay out the whole report.
pub fn lay_out(input: &ReportInput<'_>, branding: &Branding, geometry: Geometry) -> Layout {
    let mut cursor = Cursor::new(geometry);
    let result = input.result;

    cursor.outline.push(OutlineItem::Heading(TITLE.to_string()));
    cursor.line(TITLE, Face::Bold, TITLE_SIZE, ACCENT, Align::Center);
    let id_line = format!("Diagnosis ID: {}", input.session_id);
    cursor.line(&id_line, Face::Regular, BODY_SIZE, MUTED, Align::Center);
    cursor.outline.push(OutlineItem::Text(id_line));

    cursor.section("Customer", &format!("Name: {}", input.customer_name));

    cursor.heading("Severity score");
    cursor.paragraph(
        &format!("{} / {}", result.severity_score, MAX_SEVERITY),
        Face::Bold,
        SEVERITY_SIZE,
        ACCENT,
    );

    if result.is_not_applicable() {
        cursor.section(NO_DAMAGE_HEADING, &result.damage_description);
    } else {
        let [locations, details, cost, first_aid, likelihood, plan] = DAMAGE_SECTIONS;
        cursor.section(locations, &result.damage_locations);
        cursor.section(details, &result.damage_description);
        cursor.section(
            cost,
            &format!(
                "{} – {}",
                format_yen(result.estimated_cost_min),
                format_yen(result.estimated_cost_max)
            ),
        );
        cursor.section(first_aid, &format_yen(result.first_aid_cost));
        cursor.section(likelihood, result.insurance_likelihood.label());
        cursor.section(plan, &result.recommended_plan);
    }

    if !input.images.is_empty() {
        cursor.new_page();
        cursor.heading(PHOTOS_HEADING);
        cursor.photo_grid(input.images);
    }

    cursor.finish(branding)
}
