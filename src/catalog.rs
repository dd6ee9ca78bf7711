use crate::auth::CurrentUser;
use crate::database::MovieDb;
use crate::error::Error;
use crate::model::{Entry, Movie};
use crate::tmdb::{GatewayError, MovieGateway, MovieInfo};
use crate::{flash_context, redirect, render, Db, FlashQuery, Gateway, Tera};
use actix_web::{web, HttpResponse};
use log::{debug, info};
use serde::Deserialize;
use std::cmp::Ordering;

/// Unrated movies sort below every rated one, ties keep insertion order.
fn by_rating(a: &Entry<Movie>, b: &Entry<Movie>) -> Ordering {
    let ratings = match (a.value.rating, b.value.rating) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.total_cmp(&b),
    };
    ratings.then(a.id.cmp(&b.id))
}

/// Sorts ascending by rating and numbers the result so the lowest rated
/// movie is ranked 1 and the highest rated is ranked `movies.len()`.
pub fn assign_rankings(movies: &mut [Entry<Movie>]) {
    movies.sort_by(by_rating);
    for (position, entry) in movies.iter_mut().enumerate() {
        entry.value.ranking = Some(position as u32 + 1);
    }
}

/// Recomputes every ranking and writes it back. Only the ranking field is
/// written, so an edit landing mid-listing survives. Two concurrent listings
/// may interleave their writes; the next listing repairs the result.
pub fn list_ranked<D>(db: &D) -> Result<Vec<Entry<Movie>>, Error>
where
    D: MovieDb,
    Error: From<D::Error>,
{
    let mut movies = db.get_movies()?;
    assign_rankings(&mut movies);
    for entry in &movies {
        let ranking = entry.value.ranking.unwrap_or_default();
        if !db.set_ranking(entry.id, ranking)? {
            debug!("movie {} removed while ranking", entry.id);
        }
    }
    Ok(movies)
}

pub async fn begin_add(gateway: &dyn MovieGateway, title: &str) -> Result<Vec<MovieInfo>, Error> {
    Ok(gateway.search_by_title(title).await?)
}

fn movie_from_details(
    details: MovieInfo,
    gateway: &dyn MovieGateway,
) -> Result<Movie, GatewayError> {
    let title = details
        .title
        .filter(|title| !title.is_empty())
        .ok_or(GatewayError::Malformed("title"))?;
    let year = details
        .release_date
        .as_deref()
        .and_then(|date| date.get(..4))
        .and_then(|year| year.parse::<i32>().ok())
        .ok_or(GatewayError::Malformed("release_date"))?;
    let poster_path = details
        .poster_path
        .ok_or(GatewayError::Malformed("poster_path"))?;
    Ok(Movie {
        title,
        description: details.overview.unwrap_or_default(),
        review: None,
        ranking: None,
        rating: None,
        year,
        img_url: gateway.poster_url(&poster_path),
    })
}

/// Copies a provider movie into the catalog, unrated, and returns its id.
pub async fn finalize_add<D>(
    db: &D,
    gateway: &dyn MovieGateway,
    external_id: u64,
) -> Result<u64, Error>
where
    D: MovieDb,
    Error: From<D::Error>,
{
    let details = gateway.get_details(external_id).await?;
    let movie = movie_from_details(details, gateway)?;
    match db.add_movie(&movie)? {
        Some(id) => {
            info!("added {:?} as movie {}", movie.title, id);
            Ok(id)
        }
        None => Err(Error::DuplicateTitle(movie.title)),
    }
}

pub fn get<D>(db: &D, id: u64) -> Result<Entry<Movie>, Error>
where
    D: MovieDb,
    Error: From<D::Error>,
{
    let movie = db.get_movie(id)?.ok_or(Error::NotFound)?;
    Ok(Entry::new(id, movie))
}

pub fn edit_rating_review<D>(
    db: &D,
    id: u64,
    rating: f64,
    review: Option<String>,
) -> Result<Entry<Movie>, Error>
where
    D: MovieDb,
    Error: From<D::Error>,
{
    let mut movie = db.get_movie(id)?.ok_or(Error::NotFound)?;
    movie.rating = Some(rating);
    movie.review = review.filter(|review| !review.is_empty());
    if !db.update_movie(id, &movie)? {
        return Err(Error::NotFound);
    }
    Ok(Entry::new(id, movie))
}

pub fn delete<D>(db: &D, id: u64) -> Result<Movie, Error>
where
    D: MovieDb,
    Error: From<D::Error>,
{
    db.remove_movie(id)?.ok_or(Error::NotFound)
}

#[derive(Deserialize)]
pub struct IdQuery {
    id: u64,
}

#[derive(Deserialize)]
pub struct FindParams {
    title: String,
}

#[derive(Deserialize)]
pub struct EditParams {
    rating: f64,
    #[serde(default)]
    review: Option<String>,
}

pub async fn home(user: CurrentUser, tera: Tera, db: Db) -> actix_web::Result<HttpResponse> {
    debug!("listing movies for user {}", user.id);
    let movies = list_ranked(db.get_ref())?;
    let mut ctx = tera::Context::new();
    ctx.insert("username", &user.user.username);
    ctx.insert("movies", &movies);
    render(&tera, "index.html", &ctx)
}

pub async fn find(
    _user: CurrentUser,
    tera: Tera,
    query: web::Query<FlashQuery>,
) -> actix_web::Result<HttpResponse> {
    render(&tera, "add.html", &flash_context(&query))
}

pub async fn find_post(
    _user: CurrentUser,
    params: web::Form<FindParams>,
    tera: Tera,
    gateway: Gateway,
) -> actix_web::Result<HttpResponse> {
    let title = params.title.trim();
    if title.is_empty() {
        return Ok(redirect("/find?error=missing_fields"));
    }
    let options = begin_add(gateway.get_ref(), title).await?;
    let mut ctx = tera::Context::new();
    ctx.insert("options", &options);
    render(&tera, "select.html", &ctx)
}

pub async fn edit(
    _user: CurrentUser,
    query: web::Query<IdQuery>,
    tera: Tera,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let movie = get(db.get_ref(), query.id)?;
    let mut ctx = tera::Context::new();
    ctx.insert("movie", &movie);
    render(&tera, "edit.html", &ctx)
}

pub async fn edit_post(
    _user: CurrentUser,
    query: web::Query<IdQuery>,
    params: web::Form<EditParams>,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let EditParams { rating, review } = params.into_inner();
    edit_rating_review(db.get_ref(), query.id, rating, review)?;
    Ok(redirect("/home"))
}

pub async fn add_movie(
    _user: CurrentUser,
    query: web::Query<IdQuery>,
    db: Db,
    gateway: Gateway,
) -> actix_web::Result<HttpResponse> {
    let id = finalize_add(db.get_ref(), gateway.get_ref(), query.id).await?;
    Ok(redirect(&format!("/edit?id={}", id)))
}

pub async fn delete_movie(
    _user: CurrentUser,
    query: web::Query<IdQuery>,
    db: Db,
) -> actix_web::Result<HttpResponse> {
    let movie = delete(db.get_ref(), query.id)?;
    info!("deleted movie {} ({:?})", query.id, movie.title);
    Ok(redirect("/home"))
}

pub async fn select(_user: CurrentUser, tera: Tera) -> actix_web::Result<HttpResponse> {
    let mut ctx = tera::Context::new();
    ctx.insert("options", &Vec::<MovieInfo>::new());
    render(&tera, "select.html", &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DbError;
    use crate::tmdb::FakeGateway;
    use std::cell::Cell;

    /// Applies a rating edit right before the first ranking write lands.
    struct EditsWhileRanking {
        inner: sled::Db,
        pending: Cell<Option<u64>>,
    }

    impl MovieDb for EditsWhileRanking {
        type Error = DbError;

        fn add_movie(&self, movie: &Movie) -> Result<Option<u64>, DbError> {
            self.inner.add_movie(movie)
        }

        fn get_movie(&self, id: u64) -> Result<Option<Movie>, DbError> {
            self.inner.get_movie(id)
        }

        fn get_movies(&self) -> Result<Vec<Entry<Movie>>, DbError> {
            self.inner.get_movies()
        }

        fn update_movie(&self, id: u64, movie: &Movie) -> Result<bool, DbError> {
            self.inner.update_movie(id, movie)
        }

        fn set_ranking(&self, id: u64, ranking: u32) -> Result<bool, DbError> {
            if let Some(edited) = self.pending.take() {
                edit_rating_review(&self.inner, edited, 9.0, Some("great".to_owned())).unwrap();
            }
            self.inner.set_ranking(id, ranking)
        }

        fn remove_movie(&self, id: u64) -> Result<Option<Movie>, DbError> {
            self.inner.remove_movie(id)
        }
    }

    fn temporary() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn movie(title: &str, rating: Option<f64>) -> Movie {
        Movie {
            title: title.to_owned(),
            description: format!("{} description", title),
            review: None,
            ranking: None,
            rating,
            year: 2000,
            img_url: format!("https://image.tmdb.org/t/p/w500/{}.jpg", title),
        }
    }

    fn ranking_of(movies: &[Entry<Movie>], title: &str) -> Option<u32> {
        movies
            .iter()
            .find(|entry| entry.value.title == title)
            .and_then(|entry| entry.value.ranking)
    }

    #[test]
    fn highest_rating_ranks_last() {
        let db = temporary();
        let ratings = [7.0, 2.5, 9.1, 4.0, 8.2];
        for (i, rating) in ratings.iter().enumerate() {
            db.add_movie(&movie(&format!("m{}", i), Some(*rating)))
                .unwrap();
        }

        let movies = list_ranked(&db).unwrap();

        let order: Vec<f64> = movies.iter().filter_map(|e| e.value.rating).collect();
        assert_eq!(order, vec![2.5, 4.0, 7.0, 8.2, 9.1]);
        assert_eq!(ranking_of(&movies, "m2"), Some(5));
        assert_eq!(ranking_of(&movies, "m1"), Some(1));
        let mut rankings: Vec<u32> = movies.iter().filter_map(|e| e.value.ranking).collect();
        rankings.sort_unstable();
        assert_eq!(rankings, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn rankings_are_persisted() {
        let db = temporary();
        let low = db.add_movie(&movie("Low", Some(1.0))).unwrap().unwrap();
        let high = db.add_movie(&movie("High", Some(9.0))).unwrap().unwrap();

        list_ranked(&db).unwrap();

        assert_eq!(db.get_movie(low).unwrap().unwrap().ranking, Some(1));
        assert_eq!(db.get_movie(high).unwrap().unwrap().ranking, Some(2));
    }

    #[test]
    fn edit_during_listing_is_kept() {
        let inner = temporary();
        let id = inner.add_movie(&movie("Foo", None)).unwrap().unwrap();
        let db = EditsWhileRanking {
            inner,
            pending: Cell::new(Some(id)),
        };

        list_ranked(&db).unwrap();

        let stored = db.get_movie(id).unwrap().unwrap();
        assert_eq!(stored.rating, Some(9.0));
        assert_eq!(stored.review.as_deref(), Some("great"));
        assert_eq!(stored.ranking, Some(1));
    }

    #[test]
    fn unrated_movies_rank_lowest() {
        let db = temporary();
        let first = db.add_movie(&movie("Unrated A", None)).unwrap().unwrap();
        db.add_movie(&movie("Rated", Some(0.5))).unwrap();
        let second = db.add_movie(&movie("Unrated B", None)).unwrap().unwrap();

        let movies = list_ranked(&db).unwrap();

        let ids: Vec<u64> = movies.iter().map(|e| e.id).collect();
        assert_eq!(&ids[..2], &[first, second]);
        assert_eq!(ranking_of(&movies, "Rated"), Some(3));
    }

    #[test]
    fn empty_catalog() {
        let db = temporary();
        assert!(list_ranked(&db).unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn finalize_builds_entry_from_details() {
        let db = temporary();
        let gateway = FakeGateway::with_foo();

        let id = finalize_add(&db, &gateway, 101).await.unwrap();

        let movie = db.get_movie(id).unwrap().unwrap();
        assert_eq!(movie.title, "Foo");
        assert_eq!(movie.year, 1999);
        assert_eq!(movie.description, "desc");
        assert_eq!(movie.img_url, "https://image.tmdb.org/t/p/w500/x.jpg");
        assert_eq!((movie.rating, movie.review, movie.ranking), (None, None, None));
    }

    #[actix_rt::test]
    async fn finalize_reports_upstream_failures() {
        let db = temporary();
        let gateway = FakeGateway::with_foo();

        assert!(matches!(
            finalize_add(&db, &gateway, 404).await,
            Err(Error::UpstreamUnavailable(_))
        ));
        assert!(db.get_movies().unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn finalize_rejects_malformed_details() {
        let db = temporary();
        let gateway = FakeGateway::new(vec![MovieInfo {
            id: 7,
            title: Some("No Date".to_owned()),
            overview: Some("desc".to_owned()),
            poster_path: Some("/y.jpg".to_owned()),
            release_date: Some(String::new()),
            ..MovieInfo::default()
        }]);

        assert!(matches!(
            finalize_add(&db, &gateway, 7).await,
            Err(Error::UpstreamUnavailable(GatewayError::Malformed("release_date")))
        ));
    }

    #[actix_rt::test]
    async fn finalize_twice_is_a_duplicate() {
        let db = temporary();
        let gateway = FakeGateway::with_foo();
        finalize_add(&db, &gateway, 101).await.unwrap();

        assert!(matches!(
            finalize_add(&db, &gateway, 101).await,
            Err(Error::DuplicateTitle(title)) if title == "Foo"
        ));
    }

    #[actix_rt::test]
    async fn begin_add_passes_results_through() {
        let gateway = FakeGateway::with_foo();
        let results = begin_add(&gateway, "Foo").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 101);
        assert!(begin_add(&gateway, "Bar").await.unwrap().is_empty());
    }

    #[actix_rt::test]
    async fn added_movie_ranks_against_existing_entries() {
        let db = temporary();
        let gateway = FakeGateway::with_foo();
        let other = db.add_movie(&movie("Other", Some(6.0))).unwrap().unwrap();

        let foo = finalize_add(&db, &gateway, 101).await.unwrap();
        let edited = edit_rating_review(&db, foo, 8.5, Some("great".to_owned())).unwrap();
        assert_eq!(edited.value.rating, Some(8.5));
        assert_eq!(edited.value.review.as_deref(), Some("great"));

        let movies = list_ranked(&db).unwrap();
        let ids: Vec<u64> = movies.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![other, foo]);
        assert_eq!(ranking_of(&movies, "Foo"), Some(2));
        assert_eq!(ranking_of(&movies, "Other"), Some(1));
    }

    #[test]
    fn edit_missing_movie() {
        let db = temporary();
        assert!(matches!(
            edit_rating_review(&db, 99, 5.0, None),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn delete_removes_entry() {
        let db = temporary();
        let id = db.add_movie(&movie("Gone", Some(3.0))).unwrap().unwrap();

        assert_eq!(delete(&db, id).unwrap().title, "Gone");
        assert!(matches!(get(&db, id), Err(Error::NotFound)));
        assert!(matches!(delete(&db, id), Err(Error::NotFound)));
    }
}
