pub mod geometry {
    use glam::DVec2;
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，图纸坐标均为双精度。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn translate(self, offset: Vector2) -> Self {
            Self(self.0 + offset.0)
        }

        #[inline]
        pub fn vector_to(self, other: Point2) -> Vector2 {
            Vector2(other.0 - self.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_points(start: Point2, end: Point2) -> Self {
            Self(end.0 - start.0)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于文字范围与图纸范围。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        /// 由任意两个对角点构造，自动归一化最小/最大角。
        pub fn from_corners(a: Point2, b: Point2) -> Self {
            Self {
                min: Point2::from_vec(a.as_vec2().min(b.as_vec2())),
                max: Point2::from_vec(a.as_vec2().max(b.as_vec2())),
            }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        #[inline]
        pub fn width(&self) -> f64 {
            self.max.x() - self.min.x()
        }

        #[inline]
        pub fn height(&self) -> f64 {
            self.max.y() - self.min.y()
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            self.min = Point2::from_vec(self.min.as_vec2().min(point.as_vec2()));
            self.max = Point2::from_vec(self.max.as_vec2().max(point.as_vec2()));
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 闭区间包含判断，边界上的点视为在内。
        pub fn contains(&self, point: Point2) -> bool {
            !self.is_empty()
                && point.x() >= self.min.x()
                && point.x() <= self.max.x()
                && point.y() >= self.min.y()
                && point.y() <= self.max.y()
        }

        #[inline]
        pub fn center(&self) -> Point2 {
            debug_assert!(!self.is_empty());
            Point2::from_vec((self.min.as_vec2() + self.max.as_vec2()) * 0.5)
        }
    }
}

pub mod document {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    use crate::geometry::{Bounds2D, Point2, Vector2};

    /// 基础图层名称，任何图纸都必须保留。
    pub const BASE_LAYER: &str = "0";

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum DocumentError {
        #[error("layer {0:?} does not exist")]
        MissingLayer(String),
        #[error("layer {0:?} already exists")]
        LayerExists(String),
        #[error("layer {name:?} still holds {count} element(s)")]
        LayerNotEmpty { name: String, count: usize },
        #[error("layer {0:?} cannot be removed")]
        ProtectedLayer(String),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct ElementId(u64);

    impl ElementId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Color {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Color {
        pub const WHITE: Color = Color::rgb(255, 255, 255);
        pub const RED: Color = Color::rgb(255, 0, 0);

        pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b }
        }
    }

    impl Default for Color {
        fn default() -> Self {
            Color::WHITE
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Layer {
        pub name: String,
        #[serde(default)]
        pub is_locked: bool,
        #[serde(default)]
        pub is_frozen: bool,
        #[serde(default)]
        pub is_hidden: bool,
        #[serde(default)]
        pub color: Color,
    }

    impl Layer {
        #[inline]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                is_locked: false,
                is_frozen: false,
                is_hidden: false,
                color: Color::WHITE,
            }
        }

        pub fn with_color(mut self, color: Color) -> Self {
            self.color = color;
            self
        }
    }

    /// 单行文字的对齐方式，对应宿主格式中的水平/垂直对齐组合。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub enum Justification {
        #[default]
        Left,
        Center,
        Right,
        Aligned,
        Middle,
        Fit,
        TopLeft,
        TopCenter,
        TopRight,
        MiddleLeft,
        MiddleCenter,
        MiddleRight,
        BottomLeft,
        BottomCenter,
        BottomRight,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TextLabel {
        pub content: String,
        pub insert: Point2,
        /// 对齐点；左对齐文字通常没有独立的对齐点。
        #[serde(default)]
        pub alignment: Option<Point2>,
        pub height: f64,
        #[serde(default = "TextLabel::default_width_factor")]
        pub width_factor: f64,
        #[serde(default)]
        pub rotation: f64,
        #[serde(default)]
        pub justification: Justification,
        /// 宿主计算出的几何范围，缺失时由报告阶段估算。
        #[serde(default)]
        pub extents: Option<Bounds2D>,
        #[serde(default)]
        pub style: Option<String>,
        pub layer: String,
    }

    impl TextLabel {
        pub fn new(
            content: impl Into<String>,
            insert: Point2,
            height: f64,
            layer: impl Into<String>,
        ) -> Self {
            Self {
                content: content.into(),
                insert,
                alignment: None,
                height,
                width_factor: Self::default_width_factor(),
                rotation: 0.0,
                justification: Justification::Left,
                extents: None,
                style: None,
                layer: layer.into(),
            }
        }

        fn default_width_factor() -> f64 {
            1.0
        }

        pub fn with_alignment(mut self, alignment: Point2, justification: Justification) -> Self {
            self.alignment = Some(alignment);
            self.justification = justification;
            self
        }

        pub fn with_extents(mut self, extents: Bounds2D) -> Self {
            self.extents = Some(extents);
            self
        }

        /// 空间判断使用的对齐点；没有对齐点时回退到插入点。
        #[inline]
        pub fn alignment_point(&self) -> Point2 {
            self.alignment.unwrap_or(self.insert)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct LineLike {
        pub vertices: Vec<Point2>,
        #[serde(default)]
        pub is_closed: bool,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PointMarker {
        pub position: Point2,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct AttributeText {
        pub tag: String,
        pub text: String,
        pub insert: Point2,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BlockInstance {
        pub name: String,
        pub insert: Point2,
        #[serde(default)]
        pub attributes: Vec<AttributeText>,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Element {
        Text(TextLabel),
        Line(LineLike),
        Point(PointMarker),
        Block(BlockInstance),
    }

    impl Element {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Element::Text(text) => &text.layer,
                Element::Line(line) => &line.layer,
                Element::Point(point) => &point.layer,
                Element::Block(block) => &block.layer,
            }
        }

        fn layer_slot(&mut self) -> &mut String {
            match self {
                Element::Text(text) => &mut text.layer,
                Element::Line(line) => &mut line.layer,
                Element::Point(point) => &mut point.layer,
                Element::Block(block) => &mut block.layer,
            }
        }

        /// 锚点：文字与块取插入点，线取首个顶点。
        pub fn anchor(&self) -> Point2 {
            match self {
                Element::Text(text) => text.insert,
                Element::Line(line) => line
                    .vertices
                    .first()
                    .copied()
                    .unwrap_or_else(|| Point2::new(0.0, 0.0)),
                Element::Point(point) => point.position,
                Element::Block(block) => block.insert,
            }
        }

        pub fn kind(&self) -> &'static str {
            match self {
                Element::Text(_) => "text",
                Element::Line(_) => "line",
                Element::Point(_) => "point",
                Element::Block(_) => "block",
            }
        }

        pub fn as_text(&self) -> Option<&TextLabel> {
            match self {
                Element::Text(text) => Some(text),
                _ => None,
            }
        }

        pub fn as_text_mut(&mut self) -> Option<&mut TextLabel> {
            match self {
                Element::Text(text) => Some(text),
                _ => None,
            }
        }

        pub fn translate(&mut self, offset: Vector2) {
            match self {
                Element::Text(text) => {
                    text.insert = text.insert.translate(offset);
                    text.alignment = text.alignment.map(|p| p.translate(offset));
                    text.extents = text.extents.map(|b| {
                        Bounds2D::new(b.min().translate(offset), b.max().translate(offset))
                    });
                }
                Element::Line(line) => {
                    for vertex in &mut line.vertices {
                        *vertex = vertex.translate(offset);
                    }
                }
                Element::Point(point) => point.position = point.position.translate(offset),
                Element::Block(block) => {
                    block.insert = block.insert.translate(offset);
                    for attribute in &mut block.attributes {
                        attribute.insert = attribute.insert.translate(offset);
                    }
                }
            }
        }

        /// 计算 2D 范围；文字优先使用宿主提供的范围，否则退化为插入点。
        pub fn bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            match self {
                Element::Text(text) => match text.extents {
                    Some(extents) => bounds.include_bounds(&extents),
                    None => bounds.include_point(text.insert),
                },
                Element::Line(line) => {
                    for vertex in &line.vertices {
                        bounds.include_point(*vertex);
                    }
                }
                Element::Point(point) => bounds.include_point(point.position),
                Element::Block(block) => bounds.include_point(block.insert),
            }
            (!bounds.is_empty()).then_some(bounds)
        }
    }

    /// 外部参照挂接记录。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct XrefAttachment {
        pub name: String,
        pub path: PathBuf,
    }

    /// 一张图纸：图层命名空间加上按插入顺序排列的元素。
    ///
    /// 元素 id 单调递增，`elements` 始终按 id 有序，查找用二分。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Document {
        layers: BTreeMap<String, Layer>,
        #[serde(deserialize_with = "sorted_elements")]
        elements: Vec<(ElementId, Element)>,
        next_element_id: u64,
        /// 受保护、不可删除的基础图层。
        #[serde(default = "default_base_layer")]
        base_layer: String,
        #[serde(default)]
        current_layer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extents: Option<Bounds2D>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xrefs: Vec<XrefAttachment>,
    }

    fn default_base_layer() -> String {
        BASE_LAYER.to_string()
    }

    fn sorted_elements<'de, D>(deserializer: D) -> Result<Vec<(ElementId, Element)>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mut elements = Vec::<(ElementId, Element)>::deserialize(deserializer)?;
        elements.sort_by_key(|(id, _)| *id);
        Ok(elements)
    }

    impl Default for Document {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Document {
        pub fn new() -> Self {
            let mut doc = Self {
                layers: BTreeMap::new(),
                elements: Vec::new(),
                next_element_id: 0,
                base_layer: default_base_layer(),
                current_layer: BASE_LAYER.to_string(),
                extents: None,
                properties: BTreeMap::new(),
                xrefs: Vec::new(),
            };
            doc.ensure_layer(BASE_LAYER);
            doc
        }

        pub fn base_layer(&self) -> &str {
            &self.base_layer
        }

        /// 更换受保护的基础图层（不存在时创建）。原基础图层随之变为普通图层。
        pub fn set_base_layer(&mut self, name: &str) {
            if self.base_layer == name {
                return;
            }
            self.ensure_layer(name);
            self.base_layer = name.to_string();
        }

        fn position(&self, id: ElementId) -> Option<usize> {
            self.elements
                .binary_search_by_key(&id, |(element_id, _)| *element_id)
                .ok()
        }

        pub fn ensure_layer(&mut self, name: impl AsRef<str>) -> &mut Layer {
            let key = name.as_ref();
            self.layers
                .entry(key.to_string())
                .or_insert_with(|| Layer::new(key))
        }

        pub fn insert_layer(&mut self, layer: Layer) -> Result<(), DocumentError> {
            if self.layers.contains_key(&layer.name) {
                return Err(DocumentError::LayerExists(layer.name));
            }
            self.layers.insert(layer.name.clone(), layer);
            Ok(())
        }

        #[inline]
        pub fn has_layer(&self, name: &str) -> bool {
            self.layers.contains_key(name)
        }

        pub fn layer(&self, name: &str) -> Option<&Layer> {
            self.layers.get(name)
        }

        pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
            self.layers.get_mut(name)
        }

        pub fn layers(&self) -> impl Iterator<Item = &Layer> {
            self.layers.values()
        }

        pub fn layers_mut(&mut self) -> impl Iterator<Item = &mut Layer> {
            self.layers.values_mut()
        }

        pub fn layer_names(&self) -> Vec<String> {
            self.layers.keys().cloned().collect()
        }

        pub fn add_element(&mut self, element: Element) -> ElementId {
            self.ensure_layer(element.layer_name());
            let id = self.next_id();
            self.elements.push((id, element));
            id
        }

        pub fn add_text(
            &mut self,
            content: impl Into<String>,
            insert: Point2,
            height: f64,
            layer: impl Into<String>,
        ) -> ElementId {
            self.add_element(Element::Text(TextLabel::new(content, insert, height, layer)))
        }

        pub fn add_line(&mut self, start: Point2, end: Point2, layer: impl Into<String>) -> ElementId {
            self.add_element(Element::Line(LineLike {
                vertices: vec![start, end],
                is_closed: false,
                layer: layer.into(),
            }))
        }

        pub fn add_point(&mut self, position: Point2, layer: impl Into<String>) -> ElementId {
            self.add_element(Element::Point(PointMarker {
                position,
                layer: layer.into(),
            }))
        }

        pub fn element(&self, id: ElementId) -> Option<&Element> {
            let index = self.position(id)?;
            Some(&self.elements[index].1)
        }

        pub fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
            let index = self.position(id)?;
            Some(&mut self.elements[index].1)
        }

        pub fn elements(&self) -> impl Iterator<Item = (ElementId, &Element)> {
            self.elements.iter().map(|(id, element)| (*id, element))
        }

        pub fn element_count(&self) -> usize {
            self.elements.len()
        }

        pub fn texts(&self) -> impl Iterator<Item = (ElementId, &TextLabel)> {
            self.elements
                .iter()
                .filter_map(|(id, element)| element.as_text().map(|text| (*id, text)))
        }

        pub fn elements_on_layer<'a>(
            &'a self,
            layer: &'a str,
        ) -> impl Iterator<Item = (ElementId, &'a Element)> + 'a {
            self.elements
                .iter()
                .filter(move |(_, element)| element.layer_name() == layer)
                .map(|(id, element)| (*id, element))
        }

        pub fn count_on_layer(&self, layer: &str) -> usize {
            self.elements_on_layer(layer).count()
        }

        pub fn remove_element(&mut self, id: ElementId) -> Option<Element> {
            let index = self.position(id)?;
            Some(self.elements.remove(index).1)
        }

        /// 删除图层上的全部元素，返回删除数量。
        pub fn erase_layer_contents(&mut self, layer: &str) -> usize {
            let before = self.elements.len();
            self.elements.retain(|(_, element)| element.layer_name() != layer);
            before - self.elements.len()
        }

        /// 移除一个空图层。基础图层不可移除；若移除的是当前图层，当前图层回到基础图层。
        pub fn remove_layer(&mut self, name: &str) -> Result<Layer, DocumentError> {
            if name == self.base_layer {
                return Err(DocumentError::ProtectedLayer(name.to_string()));
            }
            if !self.layers.contains_key(name) {
                return Err(DocumentError::MissingLayer(name.to_string()));
            }
            let count = self.count_on_layer(name);
            if count > 0 {
                return Err(DocumentError::LayerNotEmpty {
                    name: name.to_string(),
                    count,
                });
            }
            if self.current_layer == name {
                let base = self.base_layer.clone();
                self.ensure_layer(&base);
                self.current_layer = base;
            }
            self.layers
                .remove(name)
                .ok_or_else(|| DocumentError::MissingLayer(name.to_string()))
        }

        /// 先显式清空元素，再移除图层；返回被删除的元素数量。
        pub fn delete_layer(&mut self, name: &str) -> Result<usize, DocumentError> {
            if name == self.base_layer {
                return Err(DocumentError::ProtectedLayer(name.to_string()));
            }
            if !self.layers.contains_key(name) {
                return Err(DocumentError::MissingLayer(name.to_string()));
            }
            let erased = self.erase_layer_contents(name);
            self.remove_layer(name)?;
            Ok(erased)
        }

        /// 重命名图层，元素随图层一起迁移。
        pub fn rename_layer(&mut self, from: &str, to: &str) -> Result<(), DocumentError> {
            if from == to {
                return if self.has_layer(from) {
                    Ok(())
                } else {
                    Err(DocumentError::MissingLayer(from.to_string()))
                };
            }
            if self.has_layer(to) {
                return Err(DocumentError::LayerExists(to.to_string()));
            }
            let mut layer = self
                .layers
                .remove(from)
                .ok_or_else(|| DocumentError::MissingLayer(from.to_string()))?;
            layer.name = to.to_string();
            self.layers.insert(to.to_string(), layer);
            for (_, element) in &mut self.elements {
                if element.layer_name() == from {
                    *element.layer_slot() = to.to_string();
                }
            }
            if self.current_layer == from {
                self.current_layer = to.to_string();
            }
            if self.base_layer == from {
                self.base_layer = to.to_string();
            }
            Ok(())
        }

        /// 深拷贝元素到目标图层（新 id），原元素保持不变。
        pub fn clone_to_layer(&mut self, id: ElementId, layer: &str) -> Option<ElementId> {
            let mut copy = self.element(id)?.clone();
            *copy.layer_slot() = layer.to_string();
            Some(self.add_element(copy))
        }

        pub fn current_layer(&self) -> &str {
            &self.current_layer
        }

        pub fn set_current_layer(&mut self, name: &str) -> Result<(), DocumentError> {
            if !self.has_layer(name) {
                return Err(DocumentError::MissingLayer(name.to_string()));
            }
            self.current_layer = name.to_string();
            Ok(())
        }

        /// 图纸范围：优先使用头部记录，否则由元素计算。
        pub fn extents(&self) -> Option<Bounds2D> {
            self.extents.or_else(|| self.computed_bounds())
        }

        pub fn set_extents(&mut self, extents: Option<Bounds2D>) {
            self.extents = extents;
        }

        pub fn computed_bounds(&self) -> Option<Bounds2D> {
            let mut bounds = Bounds2D::empty();
            for (_, element) in &self.elements {
                if let Some(element_bounds) = element.bounds() {
                    bounds.include_bounds(&element_bounds);
                }
            }
            (!bounds.is_empty()).then_some(bounds)
        }

        pub fn properties(&self) -> &BTreeMap<String, String> {
            &self.properties
        }

        pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.properties.insert(key.into(), value.into());
        }

        pub fn xrefs(&self) -> &[XrefAttachment] {
            &self.xrefs
        }

        pub fn attach_xref(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
            self.xrefs.push(XrefAttachment {
                name: name.into(),
                path: path.into(),
            });
        }

        pub fn detach_xref(&mut self, name: &str) -> Option<XrefAttachment> {
            let index = self.xrefs.iter().position(|xref| xref.name == name)?;
            Some(self.xrefs.remove(index))
        }

        #[inline]
        fn next_id(&mut self) -> ElementId {
            let id = ElementId::new(self.next_element_id);
            self.next_element_id += 1;
            id
        }
    }

}
