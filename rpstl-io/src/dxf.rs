use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use rpstl_core::{
    document::{
        AttributeText, BlockInstance, Color, Document, Element, Justification, Layer, LineLike,
        PointMarker, TextLabel,
    },
    geometry::{Bounds2D, Point2},
};

use crate::{DocumentLoader, DocumentSaver, FormatVersion, IoError};

/// ASCII DXF 子集：图层表、TEXT/MTEXT、LINE、LWPOLYLINE、POINT、INSERT(+ATTRIB)。
#[derive(Debug, Default, Clone, Copy)]
pub struct DxfFacade;

impl DxfFacade {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_str(source: &str) -> Result<Document, IoError> {
        DxfParser::new(source).parse().map_err(IoError::from)
    }

    pub fn render(document: &Document, format: FormatVersion) -> String {
        DxfWriter::new(format).render(document)
    }
}

impl DocumentLoader for DxfFacade {
    fn load(&self, path: &Path) -> Result<Document, IoError> {
        let data = fs::read_to_string(path).map_err(|source| IoError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&data)
    }
}

impl DocumentSaver for DxfFacade {
    fn save(&self, document: &Document, path: &Path, format: FormatVersion) -> Result<(), IoError> {
        fs::write(path, Self::render(document, format)).map_err(|source| IoError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug)]
enum DxfError {
    Unsupported { feature: String },
    Invalid { message: String },
}

impl DxfError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl From<DxfError> for IoError {
    fn from(err: DxfError) -> Self {
        match err {
            DxfError::Unsupported { feature } => IoError::UnsupportedFeature(feature),
            DxfError::Invalid { message } => IoError::InvalidDocument(message),
        }
    }
}

struct DxfParser<'a> {
    reader: DxfReader<'a>,
}

impl<'a> DxfParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            reader: DxfReader::new(source),
        }
    }

    fn parse(mut self) -> Result<Document, DxfError> {
        let mut document = Document::new();
        while let Some((code, value)) = self.reader.next_pair()? {
            if code == 999 {
                continue;
            }
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "意外的组码 {code}（期望 0 表示 SECTION/EOF）"
                )));
            }
            match value.as_str() {
                "SECTION" => {
                    let (name_code, name) = self
                        .reader
                        .next_pair()?
                        .ok_or_else(|| DxfError::invalid("SECTION 缺少名称（组码 2）"))?;
                    if name_code != 2 {
                        return Err(DxfError::invalid(format!(
                            "SECTION 名称使用了组码 {name_code}（期望 2）"
                        )));
                    }
                    match name.as_str() {
                        "HEADER" => self.parse_header(&mut document)?,
                        "TABLES" => self.parse_tables(&mut document)?,
                        "ENTITIES" => self.parse_entities(&mut document)?,
                        _ => self.skip_section()?,
                    }
                }
                "EOF" => break,
                unexpected => {
                    return Err(DxfError::invalid(format!(
                        "意外的标记 {unexpected}，期望 SECTION 或 EOF"
                    )));
                }
            }
        }
        Ok(document)
    }

    fn skip_section(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some(_) => continue,
                None => {
                    return Err(DxfError::invalid("SECTION 未找到 ENDSEC 终止标记"));
                }
            }
        }
        Ok(())
    }

    fn parse_header(&mut self, document: &mut Document) -> Result<(), DxfError> {
        let mut variable: Option<String> = None;
        let mut ext_min = (None, None);
        let mut ext_max = (None, None);
        let mut current_layer: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) if value == "ENDSEC" => break,
                Some((9, name)) => variable = Some(name.trim().to_string()),
                Some((code, value)) => match (variable.as_deref(), code) {
                    (Some("$EXTMIN"), 10) => ext_min.0 = Some(parse_f64(&value, "$EXTMIN X")?),
                    (Some("$EXTMIN"), 20) => ext_min.1 = Some(parse_f64(&value, "$EXTMIN Y")?),
                    (Some("$EXTMAX"), 10) => ext_max.0 = Some(parse_f64(&value, "$EXTMAX X")?),
                    (Some("$EXTMAX"), 20) => ext_max.1 = Some(parse_f64(&value, "$EXTMAX Y")?),
                    (Some("$CLAYER"), 8) => current_layer = Some(value.trim().to_string()),
                    _ => {}
                },
                None => return Err(DxfError::invalid("HEADER 段提前结束")),
            }
        }
        if let ((Some(x1), Some(y1)), (Some(x2), Some(y2))) = (ext_min, ext_max) {
            let extents = Bounds2D::from_corners(Point2::new(x1, y1), Point2::new(x2, y2));
            document.set_extents(Some(extents));
        }
        if let Some(name) = current_layer {
            document.ensure_layer(&name);
            // 图层表尚未解析时也保证当前图层存在
            let _ = document.set_current_layer(&name);
        }
        Ok(())
    }

    fn parse_tables(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("TABLES 段提前结束")),
            };
            if code != 0 {
                continue;
            }
            match value.as_str() {
                "ENDSEC" => break,
                "LAYER" => {
                    let layer = self.parse_layer_record()?;
                    match document.layer_mut(&layer.name) {
                        Some(existing) => *existing = layer,
                        None => {
                            document
                                .insert_layer(layer)
                                .map_err(|err| DxfError::invalid(err.to_string()))?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_layer_record(&mut self) -> Result<Layer, DxfError> {
        let mut name: Option<String> = None;
        let mut flags: i16 = 0;
        let mut aci: i16 = 7;
        let mut true_color: Option<u32> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    2 => name = Some(value.trim().to_string()),
                    70 => flags = parse_i16(&value, "LAYER 标志 (组码 70)")?,
                    62 => aci = parse_i16(&value, "LAYER 颜色 (组码 62)")?,
                    420 => true_color = Some(parse_u32(&value, "LAYER 真彩色 (组码 420)")?),
                    _ => {}
                },
                None => return Err(DxfError::invalid("LAYER 记录未正确结束")),
            }
        }
        let name = name.ok_or_else(|| DxfError::invalid("LAYER 缺少名称（组码 2）"))?;
        let color = match true_color {
            Some(raw) => Color::rgb((raw >> 16) as u8, (raw >> 8) as u8, raw as u8),
            None => aci_to_color(aci.abs()),
        };
        Ok(Layer {
            name,
            is_locked: flags & 4 != 0,
            is_frozen: flags & 1 != 0,
            is_hidden: aci < 0,
            color,
        })
    }

    fn parse_entities(&mut self, document: &mut Document) -> Result<(), DxfError> {
        loop {
            let (code, value) = match self.reader.next_pair()? {
                Some(pair) => pair,
                None => return Err(DxfError::invalid("ENTITIES 段提前结束")),
            };
            if code != 0 {
                return Err(DxfError::invalid(format!(
                    "ENTITIES 段遇到组码 {code}（期望 0 表示实体起始）"
                )));
            }

            match value.as_str() {
                "ENDSEC" => break,
                "TEXT" => {
                    let text = self.parse_text()?;
                    document.add_element(Element::Text(text));
                }
                "MTEXT" => {
                    let text = self.parse_mtext()?;
                    document.add_element(Element::Text(text));
                }
                "LINE" => {
                    let line = self.parse_line()?;
                    document.add_element(Element::Line(line));
                }
                "LWPOLYLINE" => {
                    let polyline = self.parse_lwpolyline()?;
                    document.add_element(Element::Line(polyline));
                }
                "POINT" => {
                    let point = self.parse_point()?;
                    document.add_element(Element::Point(point));
                }
                "INSERT" => {
                    let block = self.parse_insert()?;
                    document.add_element(Element::Block(block));
                }
                _ => self.skip_entity_body()?,
            }
        }
        Ok(())
    }

    fn parse_text(&mut self) -> Result<TextLabel, DxfError> {
        let mut layer = None;
        let mut insert_x = None;
        let mut insert_y = None;
        let mut align_x = None;
        let mut align_y = None;
        let mut height = None;
        let mut width_factor = 1.0;
        let mut rotation_deg = 0.0;
        let mut horizontal: i16 = 0;
        let mut vertical: i16 = 0;
        let mut style = None;
        let mut text: Option<String> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut insert_x, &value, "TEXT 插入点 X")?,
                    20 => assign_coord(&mut insert_y, &value, "TEXT 插入点 Y")?,
                    11 => assign_coord(&mut align_x, &value, "TEXT 对齐点 X")?,
                    21 => assign_coord(&mut align_y, &value, "TEXT 对齐点 Y")?,
                    40 => assign_coord(&mut height, &value, "TEXT 高度")?,
                    41 => width_factor = parse_f64(&value, "TEXT 宽度系数")?,
                    50 => rotation_deg = parse_f64(&value, "TEXT 旋转角")?,
                    72 => horizontal = parse_i16(&value, "TEXT 水平对齐 (组码 72)")?,
                    73 => vertical = parse_i16(&value, "TEXT 垂直对齐 (组码 73)")?,
                    7 => style = Some(value.trim().to_string()),
                    1 => text = Some(decode_inline_text(&value)),
                    _ => {}
                },
                None => return Err(DxfError::invalid("TEXT 未正确结束")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        let ix = insert_x.ok_or_else(|| DxfError::invalid("TEXT 缺少插入点 X（组码 10）"))?;
        let iy = insert_y.ok_or_else(|| DxfError::invalid("TEXT 缺少插入点 Y（组码 20）"))?;
        let height = height.ok_or_else(|| DxfError::invalid("TEXT 缺少文字高度（组码 40）"))?;
        let content = text.ok_or_else(|| DxfError::invalid("TEXT 缺少文本内容（组码 1）"))?;

        let mut label = TextLabel::new(content, Point2::new(ix, iy), height, layer);
        label.width_factor = width_factor;
        label.rotation = rotation_deg.to_radians();
        label.style = style;
        label.justification = justification_from_codes(horizontal, vertical);
        if let (Some(ax), Some(ay)) = (align_x, align_y) {
            label.alignment = Some(Point2::new(ax, ay));
        }
        Ok(label)
    }

    fn parse_mtext(&mut self) -> Result<TextLabel, DxfError> {
        let mut layer = None;
        let mut insert_x = None;
        let mut insert_y = None;
        let mut height = None;
        let mut attachment_point: i16 = 1;
        let mut style = None;
        let mut fragments: Vec<String> = Vec::new();

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut insert_x, &value, "MTEXT 插入点 X")?,
                    20 => assign_coord(&mut insert_y, &value, "MTEXT 插入点 Y")?,
                    40 => assign_coord(&mut height, &value, "MTEXT 高度")?,
                    71 => attachment_point = parse_i16(&value, "MTEXT 附着点 (组码 71)")?,
                    7 => style = Some(value.trim().to_string()),
                    1 | 3 => fragments.push(value),
                    _ => {}
                },
                None => return Err(DxfError::invalid("MTEXT 未正确结束")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        let ix = insert_x.ok_or_else(|| DxfError::invalid("MTEXT 缺少插入点 X（组码 10）"))?;
        let iy = insert_y.ok_or_else(|| DxfError::invalid("MTEXT 缺少插入点 Y（组码 20）"))?;
        let height = height.ok_or_else(|| DxfError::invalid("MTEXT 缺少文本高度（组码 40）"))?;
        if fragments.is_empty() {
            return Err(DxfError::invalid("MTEXT 缺少内容（组码 1/3）"));
        }
        let content = fragments
            .iter()
            .map(|fragment| decode_inline_text(fragment))
            .collect::<String>();

        let mut label = TextLabel::new(content, Point2::new(ix, iy), height, layer);
        label.style = style;
        label.justification = justification_from_attachment(attachment_point);
        Ok(label)
    }

    fn parse_line(&mut self) -> Result<LineLike, DxfError> {
        let mut layer = None;
        let (mut sx, mut sy, mut ex, mut ey) = (None, None, None, None);
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut sx, &value, "LINE 起点 X")?,
                    20 => assign_coord(&mut sy, &value, "LINE 起点 Y")?,
                    11 => assign_coord(&mut ex, &value, "LINE 终点 X")?,
                    21 => assign_coord(&mut ey, &value, "LINE 终点 Y")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("LINE 未正确结束")),
            }
        }
        let start = match (sx, sy) {
            (Some(x), Some(y)) => Point2::new(x, y),
            _ => return Err(DxfError::invalid("LINE 缺少起点坐标（组码 10/20）")),
        };
        let end = match (ex, ey) {
            (Some(x), Some(y)) => Point2::new(x, y),
            _ => return Err(DxfError::invalid("LINE 缺少终点坐标（组码 11/21）")),
        };
        Ok(LineLike {
            vertices: vec![start, end],
            is_closed: false,
            layer: layer.unwrap_or_else(|| "0".to_string()),
        })
    }

    fn parse_lwpolyline(&mut self) -> Result<LineLike, DxfError> {
        let mut layer = None;
        let mut flags: i16 = 0;
        let mut vertices: Vec<Point2> = Vec::new();
        let mut pending_x: Option<f64> = None;
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    70 => flags = parse_i16(&value, "LWPOLYLINE 标志 (组码 70)")?,
                    10 => {
                        if pending_x.is_some() {
                            return Err(DxfError::invalid("LWPOLYLINE 顶点缺少 Y 坐标"));
                        }
                        pending_x = Some(parse_f64(&value, "LWPOLYLINE 顶点 X")?);
                    }
                    20 => {
                        let x = pending_x
                            .take()
                            .ok_or_else(|| DxfError::invalid("LWPOLYLINE 顶点缺少 X 坐标"))?;
                        let y = parse_f64(&value, "LWPOLYLINE 顶点 Y")?;
                        vertices.push(Point2::new(x, y));
                    }
                    _ => {}
                },
                None => return Err(DxfError::invalid("LWPOLYLINE 未正确结束")),
            }
        }
        if vertices.is_empty() {
            return Err(DxfError::invalid("LWPOLYLINE 没有顶点"));
        }
        Ok(LineLike {
            vertices,
            is_closed: flags & 1 != 0,
            layer: layer.unwrap_or_else(|| "0".to_string()),
        })
    }

    fn parse_point(&mut self) -> Result<PointMarker, DxfError> {
        let mut layer = None;
        let (mut x, mut y) = (None, None);
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    10 => assign_coord(&mut x, &value, "POINT X")?,
                    20 => assign_coord(&mut y, &value, "POINT Y")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("POINT 未正确结束")),
            }
        }
        match (x, y) {
            (Some(x), Some(y)) => Ok(PointMarker {
                position: Point2::new(x, y),
                layer: layer.unwrap_or_else(|| "0".to_string()),
            }),
            _ => Err(DxfError::invalid("POINT 缺少坐标（组码 10/20）")),
        }
    }

    fn parse_insert(&mut self) -> Result<BlockInstance, DxfError> {
        let mut layer = None;
        let mut name = None;
        let mut insert_x = None;
        let mut insert_y = None;

        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    8 => layer = Some(value.trim().to_string()),
                    2 => {
                        if name.is_some() {
                            return Err(DxfError::invalid("INSERT 遇到重复的块名（组码 2）"));
                        }
                        name = Some(value.trim().to_string());
                    }
                    10 => assign_coord(&mut insert_x, &value, "INSERT 插入点 X")?,
                    20 => assign_coord(&mut insert_y, &value, "INSERT 插入点 Y")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("INSERT 未正确结束")),
            }
        }

        let layer = layer.unwrap_or_else(|| "0".to_string());
        let name = name.ok_or_else(|| DxfError::invalid("INSERT 缺少块名（组码 2）"))?;
        let ix = insert_x.ok_or_else(|| DxfError::invalid("INSERT 缺少插入点 X（组码 10）"))?;
        let iy = insert_y.ok_or_else(|| DxfError::invalid("INSERT 缺少插入点 Y（组码 20）"))?;

        let mut attributes = Vec::new();
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => match value.as_str() {
                    "ATTRIB" => attributes.push(self.parse_attrib()?),
                    "SEQEND" => {
                        self.skip_entity_body()?;
                        break;
                    }
                    _ => {
                        self.reader.put_back((0, value));
                        break;
                    }
                },
                Some((code, value)) => {
                    return Err(DxfError::invalid(format!(
                        "INSERT 属性段出现意外组码 {code} 值 {value}"
                    )));
                }
                None => break,
            }
        }

        Ok(BlockInstance {
            name,
            insert: Point2::new(ix, iy),
            attributes,
            layer,
        })
    }

    fn parse_attrib(&mut self) -> Result<AttributeText, DxfError> {
        let mut tag = None;
        let mut text = String::new();
        let (mut x, mut y) = (None, None);
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some((code, value)) => match code {
                    2 => tag = Some(value.trim().to_string()),
                    1 => text = decode_inline_text(&value),
                    10 => assign_coord(&mut x, &value, "ATTRIB 插入点 X")?,
                    20 => assign_coord(&mut y, &value, "ATTRIB 插入点 Y")?,
                    _ => {}
                },
                None => return Err(DxfError::invalid("ATTRIB 未正确结束")),
            }
        }
        Ok(AttributeText {
            tag: tag.ok_or_else(|| DxfError::invalid("ATTRIB 缺少标记（组码 2）"))?,
            text,
            insert: Point2::new(x.unwrap_or(0.0), y.unwrap_or(0.0)),
        })
    }

    fn skip_entity_body(&mut self) -> Result<(), DxfError> {
        loop {
            match self.reader.next_pair()? {
                Some((0, value)) => {
                    self.reader.put_back((0, value));
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
        Ok(())
    }
}

struct DxfReader<'a> {
    lines: std::str::Lines<'a>,
    buffer: Option<(i32, String)>,
    line_number: usize,
}

impl<'a> DxfReader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lines: source.lines(),
            buffer: None,
            line_number: 0,
        }
    }

    fn next_pair(&mut self) -> Result<Option<(i32, String)>, DxfError> {
        if let Some(pair) = self.buffer.take() {
            return Ok(Some(pair));
        }

        let code_line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_number += 1;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => return Ok(None),
            }
        };

        let value_line = match self.lines.next() {
            Some(line) => {
                self.line_number += 1;
                line
            }
            None => {
                return Err(DxfError::invalid(format!(
                    "文件在第 {} 行结束，缺少与组码对应的值行",
                    self.line_number
                )));
            }
        };

        let code = code_line.trim().parse::<i32>().map_err(|_| {
            DxfError::invalid(format!(
                "第 {} 行的组码 \"{}\" 无法解析为整数",
                self.line_number - 1,
                code_line.trim()
            ))
        })?;
        let value = value_line.trim_end_matches('\r').to_string();
        Ok(Some((code, value)))
    }

    fn put_back(&mut self, pair: (i32, String)) {
        debug_assert!(self.buffer.is_none(), "DXF pair 只能回退一次");
        self.buffer = Some(pair);
    }
}

struct DxfWriter {
    format: FormatVersion,
    out: String,
}

impl DxfWriter {
    fn new(format: FormatVersion) -> Self {
        Self {
            format,
            out: String::new(),
        }
    }

    fn pair(&mut self, code: i32, value: impl std::fmt::Display) {
        let _ = writeln!(self.out, "{code:>3}\n{value}");
    }

    fn render(mut self, document: &Document) -> String {
        self.header(document);
        self.tables(document);
        self.entities(document);
        self.pair(0, "EOF");
        self.out
    }

    fn header(&mut self, document: &Document) {
        self.pair(0, "SECTION");
        self.pair(2, "HEADER");
        self.pair(9, "$ACADVER");
        self.pair(1, self.format.acad_version());
        self.pair(9, "$CLAYER");
        self.pair(8, document.current_layer().to_string());
        if let Some(extents) = document.extents() {
            self.pair(9, "$EXTMIN");
            self.pair(10, extents.min().x());
            self.pair(20, extents.min().y());
            self.pair(9, "$EXTMAX");
            self.pair(10, extents.max().x());
            self.pair(20, extents.max().y());
        }
        self.pair(0, "ENDSEC");
    }

    fn tables(&mut self, document: &Document) {
        self.pair(0, "SECTION");
        self.pair(2, "TABLES");
        self.pair(0, "TABLE");
        self.pair(2, "LAYER");
        for layer in document.layers() {
            let mut flags = 0;
            if layer.is_frozen {
                flags |= 1;
            }
            if layer.is_locked {
                flags |= 4;
            }
            let aci = color_to_aci(layer.color);
            self.pair(0, "LAYER");
            self.pair(2, &layer.name);
            self.pair(70, flags);
            self.pair(62, if layer.is_hidden { -aci } else { aci });
            let rgb = (u32::from(layer.color.r) << 16)
                | (u32::from(layer.color.g) << 8)
                | u32::from(layer.color.b);
            self.pair(420, rgb);
        }
        self.pair(0, "ENDTAB");
        self.pair(0, "ENDSEC");
    }

    fn entities(&mut self, document: &Document) {
        self.pair(0, "SECTION");
        self.pair(2, "ENTITIES");
        for (_, element) in document.elements() {
            match element {
                Element::Text(text) => self.text(text),
                Element::Line(line) => self.line(line),
                Element::Point(point) => {
                    self.pair(0, "POINT");
                    self.pair(8, &point.layer);
                    self.pair(10, point.position.x());
                    self.pair(20, point.position.y());
                }
                Element::Block(block) => self.insert(block),
            }
        }
        self.pair(0, "ENDSEC");
    }

    fn text(&mut self, text: &TextLabel) {
        let (horizontal, vertical) = justification_codes(text.justification);
        self.pair(0, "TEXT");
        self.pair(8, &text.layer);
        self.pair(10, text.insert.x());
        self.pair(20, text.insert.y());
        self.pair(40, text.height);
        self.pair(1, &text.content);
        if (text.width_factor - 1.0).abs() > f64::EPSILON {
            self.pair(41, text.width_factor);
        }
        if text.rotation.abs() > f64::EPSILON {
            self.pair(50, text.rotation.to_degrees());
        }
        if let Some(style) = &text.style {
            self.pair(7, style);
        }
        if horizontal != 0 {
            self.pair(72, horizontal);
        }
        if let Some(alignment) = text.alignment {
            self.pair(11, alignment.x());
            self.pair(21, alignment.y());
        }
        if vertical != 0 {
            self.pair(73, vertical);
        }
    }

    fn line(&mut self, line: &LineLike) {
        if line.vertices.len() == 2 && !line.is_closed {
            self.pair(0, "LINE");
            self.pair(8, &line.layer);
            self.pair(10, line.vertices[0].x());
            self.pair(20, line.vertices[0].y());
            self.pair(11, line.vertices[1].x());
            self.pair(21, line.vertices[1].y());
            return;
        }
        self.pair(0, "LWPOLYLINE");
        self.pair(8, &line.layer);
        self.pair(90, line.vertices.len());
        self.pair(70, if line.is_closed { 1 } else { 0 });
        for vertex in &line.vertices {
            self.pair(10, vertex.x());
            self.pair(20, vertex.y());
        }
    }

    fn insert(&mut self, block: &BlockInstance) {
        self.pair(0, "INSERT");
        self.pair(8, &block.layer);
        if !block.attributes.is_empty() {
            self.pair(66, 1);
        }
        self.pair(2, &block.name);
        self.pair(10, block.insert.x());
        self.pair(20, block.insert.y());
        if block.attributes.is_empty() {
            return;
        }
        for attribute in &block.attributes {
            self.pair(0, "ATTRIB");
            self.pair(8, &block.layer);
            self.pair(10, attribute.insert.x());
            self.pair(20, attribute.insert.y());
            self.pair(1, &attribute.text);
            self.pair(2, &attribute.tag);
        }
        self.pair(0, "SEQEND");
        self.pair(8, &block.layer);
    }
}

fn justification_from_codes(horizontal: i16, vertical: i16) -> Justification {
    match (horizontal, vertical) {
        (1, 0) => Justification::Center,
        (2, 0) => Justification::Right,
        (3, _) => Justification::Aligned,
        (4, _) => Justification::Middle,
        (5, _) => Justification::Fit,
        (0, 3) => Justification::TopLeft,
        (1, 3) => Justification::TopCenter,
        (2, 3) => Justification::TopRight,
        (0, 2) => Justification::MiddleLeft,
        (1, 2) => Justification::MiddleCenter,
        (2, 2) => Justification::MiddleRight,
        (0, 1) => Justification::BottomLeft,
        (1, 1) => Justification::BottomCenter,
        (2, 1) => Justification::BottomRight,
        _ => Justification::Left,
    }
}

fn justification_codes(justification: Justification) -> (i16, i16) {
    match justification {
        Justification::Left => (0, 0),
        Justification::Center => (1, 0),
        Justification::Right => (2, 0),
        Justification::Aligned => (3, 0),
        Justification::Middle => (4, 0),
        Justification::Fit => (5, 0),
        Justification::TopLeft => (0, 3),
        Justification::TopCenter => (1, 3),
        Justification::TopRight => (2, 3),
        Justification::MiddleLeft => (0, 2),
        Justification::MiddleCenter => (1, 2),
        Justification::MiddleRight => (2, 2),
        Justification::BottomLeft => (0, 1),
        Justification::BottomCenter => (1, 1),
        Justification::BottomRight => (2, 1),
    }
}

fn justification_from_attachment(attachment: i16) -> Justification {
    match attachment {
        2 => Justification::TopCenter,
        3 => Justification::TopRight,
        4 => Justification::MiddleLeft,
        5 => Justification::MiddleCenter,
        6 => Justification::MiddleRight,
        7 => Justification::BottomLeft,
        8 => Justification::BottomCenter,
        9 => Justification::BottomRight,
        _ => Justification::TopLeft,
    }
}

fn aci_to_color(aci: i16) -> Color {
    match aci {
        1 => Color::RED,
        2 => Color::rgb(255, 255, 0),
        3 => Color::rgb(0, 255, 0),
        4 => Color::rgb(0, 255, 255),
        5 => Color::rgb(0, 0, 255),
        6 => Color::rgb(255, 0, 255),
        _ => Color::WHITE,
    }
}

fn color_to_aci(color: Color) -> i16 {
    match (color.r, color.g, color.b) {
        (255, 0, 0) => 1,
        (255, 255, 0) => 2,
        (0, 255, 0) => 3,
        (0, 255, 255) => 4,
        (0, 0, 255) => 5,
        (255, 0, 255) => 6,
        _ => 7,
    }
}

fn assign_coord(slot: &mut Option<f64>, raw: &str, context: &str) -> Result<(), DxfError> {
    if slot.is_some() {
        return Err(DxfError::invalid(format!("{context} 出现重复值")));
    }
    *slot = Some(parse_f64(raw, context)?);
    Ok(())
}

fn parse_f64(raw: &str, context: &str) -> Result<f64, DxfError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i32(raw: &str, context: &str) -> Result<i32, DxfError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）")))
}

fn parse_i16(raw: &str, context: &str) -> Result<i16, DxfError> {
    let value = parse_i32(raw, context)?;
    i16::try_from(value)
        .map_err(|_| DxfError::invalid(format!("{context} 超出 i16 范围（值：{value}）")))
}

fn parse_u32(raw: &str, context: &str) -> Result<u32, DxfError> {
    let value = raw.trim().parse::<i64>().map_err(|_| {
        DxfError::invalid(format!("{context} 解析失败（值：\"{raw}\"）"))
    })?;
    u32::try_from(value).map_err(|_| {
        DxfError::Unsupported {
            feature: format!("{context} 超出范围（值：{value}）"),
        }
    })
}

fn decode_inline_text(raw: &str) -> String {
    let mut result = String::new();
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('P') | Some('p') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }
    result
}
