use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Movie {
    pub title: String,
    pub year: String,
    #[serde(default)]
    pub rated: String,
    #[serde(default)]
    pub genre: String,
}

impl Movie {
    fn new(title: &str, year: &str, rated: &str, genre: &str) -> Self {
        Self {
            title: title.to_string(),
            year: year.to_string(),
            rated: rated.to_string(),
            genre: genre.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateMovie {
    pub year: Option<String>,
    pub rated: Option<String>,
    pub genre: Option<String>,
}

#[derive(Deserialize)]
pub struct MovieQuery {
    pub t: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Requests served by every route except `/stats`.
    pub hits: u64,
}

/// What the server answers after storing a poster upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosterReceipt {
    pub title: String,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    /// Text field sent alongside the file, if any.
    pub caption: Option<String>,
}

#[derive(Clone, Debug)]
struct Poster {
    file_name: String,
    content_type: String,
    bytes: Bytes,
}

#[derive(Clone)]
pub struct AppState {
    movies: Arc<RwLock<BTreeMap<String, Movie>>>,
    posters: Arc<RwLock<BTreeMap<String, Poster>>>,
    hits: Arc<AtomicU64>,
    delay: Duration,
}

impl AppState {
    pub fn seeded(delay: Duration) -> Self {
        let movies = [
            Movie::new("Hero", "2002", "PG-13", "Action, Adventure, Drama"),
            Movie::new("Her", "2013", "R", "Drama, Romance, Sci-Fi"),
            Movie::new("The Green Mile", "1999", "R", "Crime, Drama, Fantasy"),
        ]
        .into_iter()
        .map(|m| (m.title.clone(), m))
        .collect();
        Self {
            movies: Arc::new(RwLock::new(movies)),
            posters: Arc::new(RwLock::new(BTreeMap::new())),
            hits: Arc::new(AtomicU64::new(0)),
            delay,
        }
    }

    /// Count the hit, then hold the response for the configured delay.
    async fn hit(&self) {
        let n = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(hits = n, "route hit");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

pub fn app() -> Router {
    app_with_delay(Duration::ZERO)
}

/// Router whose routes (except `/stats`) each wait `delay` before answering.
pub fn app_with_delay(delay: Duration) -> Router {
    Router::new()
        .route("/movie", get(get_movie))
        .route("/movies", get(list_movies).post(create_movie))
        .route("/movies/{title}", axum::routing::put(update_movie).delete(delete_movie))
        .route("/posters/{title}", get(get_poster).post(upload_poster))
        .route("/stats", get(stats))
        .with_state(AppState::seeded(delay))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_delay(listener, Duration::ZERO).await
}

pub async fn run_with_delay(listener: TcpListener, delay: Duration) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_delay(delay)).await
}

async fn get_movie(
    State(state): State<AppState>,
    Query(query): Query<MovieQuery>,
) -> Result<Json<Movie>, StatusCode> {
    state.hit().await;
    let title = query.t.ok_or(StatusCode::BAD_REQUEST)?;
    let movies = state.movies.read().await;
    movies.get(&title).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn list_movies(State(state): State<AppState>) -> Json<Vec<Movie>> {
    state.hit().await;
    Json(state.movies.read().await.values().cloned().collect())
}

async fn create_movie(
    State(state): State<AppState>,
    Json(movie): Json<Movie>,
) -> Result<(StatusCode, Json<Movie>), StatusCode> {
    state.hit().await;
    let mut movies = state.movies.write().await;
    if movies.contains_key(&movie.title) {
        return Err(StatusCode::CONFLICT);
    }
    movies.insert(movie.title.clone(), movie.clone());
    Ok((StatusCode::CREATED, Json(movie)))
}

async fn update_movie(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(input): Json<UpdateMovie>,
) -> Result<Json<Movie>, StatusCode> {
    state.hit().await;
    let mut movies = state.movies.write().await;
    let movie = movies.get_mut(&title).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(year) = input.year {
        movie.year = year;
    }
    if let Some(rated) = input.rated {
        movie.rated = rated;
    }
    if let Some(genre) = input.genre {
        movie.genre = genre;
    }
    Ok(Json(movie.clone()))
}

async fn delete_movie(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<StatusCode, StatusCode> {
    state.hit().await;
    let mut movies = state.movies.write().await;
    movies
        .remove(&title)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Store the first file part as the poster for a known movie.
async fn upload_poster(
    State(state): State<AppState>,
    Path(title): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PosterReceipt>), StatusCode> {
    state.hit().await;
    if !state.movies.read().await.contains_key(&title) {
        return Err(StatusCode::NOT_FOUND);
    }
    let mut caption = None;
    let mut poster = None;
    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        match field.file_name().map(str::to_string) {
            Some(file_name) if poster.is_none() => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                poster = Some(Poster {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            None if field.name() == Some("caption") => {
                caption = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            _ => {}
        }
    }
    let poster = poster.ok_or(StatusCode::BAD_REQUEST)?;
    let receipt = PosterReceipt {
        title: title.clone(),
        file_name: poster.file_name.clone(),
        content_type: poster.content_type.clone(),
        size: poster.bytes.len(),
        caption,
    };
    debug!(title = %title, size = receipt.size, "poster stored");
    state.posters.write().await.insert(title, poster);
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Serve a stored poster as an attachment.
async fn get_poster(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    state.hit().await;
    let poster = state
        .posters
        .read()
        .await
        .get(&title)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;
    let disposition = format!("attachment; filename=\"{}\"", poster.file_name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, poster.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        poster.bytes,
    ))
}

async fn stats(State(state): State<AppState>) -> Json<Stats> {
    Json(Stats {
        hits: state.hits.load(Ordering::SeqCst),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_uses_capitalized_fields() {
        let json = serde_json::to_value(Movie::new("Her", "2013", "R", "Drama")).unwrap();
        assert_eq!(json["Title"], "Her");
        assert_eq!(json["Year"], "2013");
        assert_eq!(json["Rated"], "R");
        assert_eq!(json["Genre"], "Drama");
    }

    #[test]
    fn movie_rating_and_genre_are_optional() {
        let movie: Movie = serde_json::from_str(r#"{"Title":"Up","Year":"2009"}"#).unwrap();
        assert_eq!(movie.rated, "");
        assert_eq!(movie.genre, "");
    }

    #[test]
    fn movie_requires_title() {
        assert!(serde_json::from_str::<Movie>(r#"{"Year":"2009"}"#).is_err());
    }

    #[test]
    fn update_fields_are_optional() {
        let input: UpdateMovie = serde_json::from_str(r#"{"Rated":"PG"}"#).unwrap();
        assert_eq!(input.rated.as_deref(), Some("PG"));
        assert!(input.year.is_none());
        assert!(input.genre.is_none());
    }

    #[tokio::test]
    async fn seeded_state_has_three_movies() {
        let state = AppState::seeded(Duration::ZERO);
        let movies = state.movies.read().await;
        assert_eq!(
            movies.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["Her", "Hero", "The Green Mile"]
        );
    }
}
